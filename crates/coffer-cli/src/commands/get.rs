use anyhow::Result;
use std::path::Path;

use coffer_core::CofferError;
use coffer_core::store::CredentialDb;

use super::unlock::{load_config, load_envelope};

pub async fn run(
    owner: &str,
    name: &str,
    base_dir: &Path,
    cli_passphrase: &Option<String>,
) -> Result<()> {
    let config = load_config(base_dir)?;
    let db = CredentialDb::open(Path::new(&config.coffer.db_path))?;

    let credential = db
        .find_credential(owner, name)?
        .ok_or_else(|| CofferError::CredentialNotFound(format!("{owner}/{name}")))?;

    let envelope = load_envelope(&config, cli_passphrase).await?;
    let plaintext = envelope.decrypt_secret(&credential.secret)?;

    println!("{plaintext}");
    Ok(())
}
