use anyhow::Result;
use std::path::Path;

use super::unlock::{load_config, load_envelope, read_secret};

pub async fn run(value: &Option<String>, base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    let config = load_config(base_dir)?;
    let envelope = load_envelope(&config, cli_passphrase).await?;

    let plaintext = read_secret(value)?;
    let secret = envelope.encrypt(&plaintext)?;

    println!("{}", secret.to_envelope());
    Ok(())
}
