use anyhow::Result;
use std::path::Path;

use super::unlock::{load_config, open_key_provider};

pub async fn list(base_dir: &Path, cli_passphrase: &Option<String>) -> Result<()> {
    let config = load_config(base_dir)?;
    let provider = open_key_provider(&config, cli_passphrase).await?;

    let current = provider.current_version().await?;
    let keys = provider.list_keys().await?;

    println!(
        "{:<3} {:<8} {:<18} {}",
        "", "VERSION", "FINGERPRINT", "CREATED"
    );
    println!("{}", "-".repeat(64));
    for k in &keys {
        let marker = if Some(k.version) == current { "*" } else { "" };
        println!(
            "{:<3} {:<8} {:<18} {}",
            marker,
            k.version,
            k.fingerprint(),
            k.created_at
        );
    }
    if current.is_none() {
        println!("\nWARN: no current master key version is set");
    }

    Ok(())
}

pub async fn add(base_dir: &Path, cli_passphrase: &Option<String>, activate: bool) -> Result<()> {
    let config = load_config(base_dir)?;
    let mut provider = open_key_provider(&config, cli_passphrase).await?;

    let key = provider.create_key(activate).await?;
    if activate {
        println!("Created master key v{} (now current)", key.version);
        println!("Run `coffer rotate` to re-wrap existing credentials under it.");
    } else {
        println!("Created master key v{} (staged, not current)", key.version);
        println!("Run `coffer keys activate {}` when ready.", key.version);
    }

    Ok(())
}

pub async fn activate(base_dir: &Path, cli_passphrase: &Option<String>, version: u32) -> Result<()> {
    let config = load_config(base_dir)?;
    let mut provider = open_key_provider(&config, cli_passphrase).await?;

    provider.activate(version).await?;
    println!("Master key v{version} is now current");

    Ok(())
}
