//! Factory for creating the appropriate KeyProvider based on configuration.

use std::path::Path;

use crate::env::EnvKeyProvider;
use crate::local::LocalKeyProvider;
use crate::provider::KeyProvider;

/// Open the KeyProvider named by the `key_provider` config setting.
///
/// Supported types:
/// - `"local"`: encrypted keyfile (requires passphrase + an existing keyfile; `coffer init` creates it)
/// - `"env"`: `{env_prefix}_MASTER_KEYS` / `{env_prefix}_CURRENT_KEY_VERSION`
pub async fn create_key_provider(
    provider_type: &str,
    passphrase: Option<&[u8]>,
    keyfile_path: &str,
    env_prefix: &str,
) -> anyhow::Result<Box<dyn KeyProvider>> {
    match provider_type {
        "local" => {
            let passphrase = passphrase
                .ok_or_else(|| anyhow::anyhow!("Passphrase required for local key provider"))?;
            let path = Path::new(keyfile_path);
            if !path.exists() {
                anyhow::bail!(
                    "Keyfile not found at {} (run `coffer init` first)",
                    path.display()
                );
            }
            let provider = LocalKeyProvider::open(path, passphrase)?;
            Ok(Box::new(provider))
        }

        "env" => Ok(Box::new(EnvKeyProvider::from_env(env_prefix)?)),

        other => anyhow::bail!("Unknown key provider type: {other}"),
    }
}
