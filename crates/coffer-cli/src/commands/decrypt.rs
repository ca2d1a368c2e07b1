use anyhow::Result;
use std::path::Path;

use coffer_core::types::EncryptedSecret;

use super::unlock::{load_config, load_envelope};

pub async fn run(text: &str, base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    let secret = EncryptedSecret::from_envelope(text)?;

    let config = load_config(base_dir)?;
    let envelope = load_envelope(&config, cli_passphrase).await?;

    println!("{}", envelope.decrypt_secret(&secret)?);
    Ok(())
}
