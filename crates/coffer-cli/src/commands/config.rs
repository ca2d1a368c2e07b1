use anyhow::Result;
use std::path::Path;

use coffer_core::config::CofferConfig;

pub fn run(base_dir: &Path) -> Result<()> {
    let config_path = CofferConfig::default_path(base_dir);
    let config = CofferConfig::load(&config_path)?;

    println!("Config: {}", config_path.display());
    println!();
    println!("  DB path:        {}", config.coffer.db_path);
    println!("  Key provider:   {}", config.coffer.key_provider);
    match config.coffer.key_provider.as_str() {
        "local" => println!("  Keyfile:        {}", config.coffer.keyfile_path),
        "env" => {
            println!("  Keys variable:  {}_MASTER_KEYS", config.coffer.env_prefix);
            println!(
                "  Current var:    {}_CURRENT_KEY_VERSION",
                config.coffer.env_prefix
            );
        }
        _ => {}
    }
    println!("  Batch size:     {}", config.rotation.batch_size);

    Ok(())
}
