use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use coffer_core::config::CofferConfig;
use coffer_core::types::MasterKey;
use coffer_core::{EnvelopeService, MasterKeyRegistry};
use coffer_keys::provider::KeyProvider;

pub fn load_config(base_dir: &Path) -> Result<CofferConfig> {
    let config_path = CofferConfig::default_path(base_dir);
    Ok(CofferConfig::load(&config_path)?)
}

/// Open the configured key provider, prompting for the passphrase when the
/// local keyfile needs one.
pub async fn open_key_provider(
    config: &CofferConfig,
    cli_passphrase: &Option<String>,
) -> Result<Box<dyn KeyProvider>> {
    let passphrase = if config.coffer.key_provider == "local" {
        Some(crate::get_passphrase(cli_passphrase)?)
    } else {
        None
    };

    coffer_keys::factory::create_key_provider(
        &config.coffer.key_provider,
        passphrase.as_deref().map(|s| s.as_bytes()),
        &config.coffer.keyfile_path,
        &config.coffer.env_prefix,
    )
    .await
}

/// Build the immutable master key registry from a provider.
pub async fn load_registry(provider: &dyn KeyProvider) -> Result<MasterKeyRegistry> {
    let keys = provider.list_keys().await?;
    let current = provider.current_version().await?;

    let registry = MasterKeyRegistry::new(
        keys.iter().map(|k| MasterKey {
            version: k.version,
            key: k.key,
        }),
        current,
    )?;
    tracing::debug!(versions = ?registry.versions(), current = ?current, "Loaded master keys");
    Ok(registry)
}

pub async fn load_envelope(
    config: &CofferConfig,
    cli_passphrase: &Option<String>,
) -> Result<EnvelopeService> {
    let provider = open_key_provider(config, cli_passphrase).await?;
    let registry = load_registry(provider.as_ref()).await?;
    Ok(EnvelopeService::new(Arc::new(registry)))
}

/// Secret value from the command line or an interactive prompt.
pub fn read_secret(value: &Option<String>) -> Result<String> {
    if let Some(v) = value {
        return Ok(v.clone());
    }
    Ok(rpassword::prompt_password_stderr("Secret value: ")?)
}
