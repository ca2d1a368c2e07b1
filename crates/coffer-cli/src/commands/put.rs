use anyhow::Result;
use std::path::Path;

use coffer_core::store::CredentialDb;

use super::unlock::{load_config, load_envelope, read_secret};

pub async fn run(
    owner: &str,
    name: &str,
    value: &Option<String>,
    base_dir: &Path,
    cli_passphrase: &Option<String>,
) -> Result<()> {
    let config = load_config(base_dir)?;
    let db = CredentialDb::open(Path::new(&config.coffer.db_path))?;
    let envelope = load_envelope(&config, cli_passphrase).await?;

    let plaintext = read_secret(value)?;
    // Every write gets a fresh data key, including updates.
    let secret = envelope.encrypt(&plaintext)?;

    match db.find_credential(owner, name)? {
        Some(existing) => {
            db.update_credential(existing.id, &secret)?;
            println!(
                "Updated {owner}/{name} (key v{} -> v{})",
                existing.secret.key_version, secret.key_version
            );
        }
        None => {
            let id = db.insert_credential(owner, name, &secret)?;
            println!("Stored {owner}/{name} as #{id} (key v{})", secret.key_version);
        }
    }

    Ok(())
}
