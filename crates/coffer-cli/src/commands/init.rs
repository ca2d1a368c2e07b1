use anyhow::Result;
use std::path::Path;

use coffer_core::config::CofferConfig;
use coffer_core::store::CredentialDb;
use coffer_keys::local::LocalKeyProvider;

pub async fn run(base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    println!("Initializing Coffer in {}", base_dir.display());

    std::fs::create_dir_all(base_dir)?;

    let config_path = CofferConfig::default_path(base_dir);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        let config = CofferConfig::default_config(base_dir);
        config.save(&config_path)?;
        println!("Created config: {}", config_path.display());
    }

    let config = CofferConfig::load(&config_path)?;

    let db_path = Path::new(&config.coffer.db_path);
    let _db = CredentialDb::open(db_path)?;
    println!("Initialized database: {}", db_path.display());

    if config.coffer.key_provider == "local" {
        let keyfile_path = Path::new(&config.coffer.keyfile_path);
        if keyfile_path.exists() {
            println!("Keyfile already exists: {}", keyfile_path.display());
        } else {
            let passphrase = crate::get_passphrase(cli_passphrase)?;
            LocalKeyProvider::create(keyfile_path, passphrase.as_bytes())?;
            println!(
                "Created keyfile with master key v1: {}",
                keyfile_path.display()
            );
        }
    } else {
        println!(
            "Key provider '{}' configured: master keys are provisioned externally.",
            config.coffer.key_provider
        );
    }

    println!("\nCoffer initialized. Next steps:");
    println!("  1. Run `coffer put <owner> <name>` to store a credential");
    println!("  2. Run `coffer keys add` and `coffer rotate` to rotate master keys");

    Ok(())
}
