//! Master keys supplied through environment variables.
//!
//! `{PREFIX}_MASTER_KEYS` lists every version as `version:base64key`, comma
//! separated, e.g. `1:3q2+7w...,2:q83v...`. `{PREFIX}_CURRENT_KEY_VERSION`
//! names the active one. Keys are provisioned out-of-band, so this provider is
//! read-only.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::Zeroizing;

use crate::provider::{KeyProvider, ManagedKey};

pub struct EnvKeyProvider {
    keys: Vec<ManagedKey>,
    current: Option<u32>,
}

impl EnvKeyProvider {
    /// Read `{prefix}_MASTER_KEYS` and `{prefix}_CURRENT_KEY_VERSION`.
    pub fn from_env(prefix: &str) -> anyhow::Result<Self> {
        let keys_var = format!("{prefix}_MASTER_KEYS");
        let current_var = format!("{prefix}_CURRENT_KEY_VERSION");

        let entries = Zeroizing::new(
            std::env::var(&keys_var).map_err(|_| anyhow::anyhow!("{keys_var} is not set"))?,
        );
        let current = std::env::var(&current_var).ok();

        Self::parse(&entries, current.as_deref())
    }

    /// Parse a key list and optional current version.
    pub fn parse(entries: &str, current: Option<&str>) -> anyhow::Result<Self> {
        let mut keys = Vec::new();

        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (version, encoded) = entry
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("Master key entry must be version:base64key"))?;
            let version: u32 = version
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid master key version '{version}'"))?;
            if version == 0 {
                anyhow::bail!("Master key versions start at 1");
            }
            if keys.iter().any(|k: &ManagedKey| k.version == version) {
                anyhow::bail!("Master key version {version} listed twice");
            }

            let raw = Zeroizing::new(
                STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| anyhow::anyhow!("Master key {version} is not valid base64: {e}"))?,
            );
            let key: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
                anyhow::anyhow!("Master key {version} must decode to 32 bytes, got {}", raw.len())
            })?;

            keys.push(ManagedKey {
                version,
                key,
                created_at: "env".to_string(),
            });
        }

        if keys.is_empty() {
            anyhow::bail!("No master keys configured");
        }
        keys.sort_by_key(|k| k.version);

        let current = match current.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => {
                let v: u32 = c
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid current key version '{c}'"))?;
                if !keys.iter().any(|k| k.version == v) {
                    anyhow::bail!("Current key version {v} is not among the configured keys");
                }
                Some(v)
            }
            None => None,
        };

        Ok(Self { keys, current })
    }
}

#[async_trait]
impl KeyProvider for EnvKeyProvider {
    async fn current_version(&self) -> anyhow::Result<Option<u32>> {
        Ok(self.current)
    }

    async fn get_key(&self, version: u32) -> anyhow::Result<ManagedKey> {
        self.keys
            .iter()
            .find(|k| k.version == version)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Master key version {version} not found"))
    }

    async fn list_keys(&self) -> anyhow::Result<Vec<ManagedKey>> {
        Ok(self.keys.clone())
    }

    async fn create_key(&mut self, _activate: bool) -> anyhow::Result<ManagedKey> {
        anyhow::bail!("env key provider is read-only; add the key to the environment instead")
    }

    async fn activate(&mut self, _version: u32) -> anyhow::Result<()> {
        anyhow::bail!("env key provider is read-only; set the current version in the environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(byte: u8) -> String {
        STANDARD.encode([byte; 32])
    }

    #[tokio::test]
    async fn parses_keys_and_current() {
        let entries = format!("2:{}, 1:{}", b64(2), b64(1));
        let provider = EnvKeyProvider::parse(&entries, Some("2")).unwrap();

        assert_eq!(provider.current_version().await.unwrap(), Some(2));
        let versions: Vec<u32> = provider
            .list_keys()
            .await
            .unwrap()
            .iter()
            .map(|k| k.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(provider.get_key(1).await.unwrap().key, [1; 32]);
    }

    #[tokio::test]
    async fn current_is_optional() {
        let provider = EnvKeyProvider::parse(&format!("1:{}", b64(1)), None).unwrap();
        assert_eq!(provider.current_version().await.unwrap(), None);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(EnvKeyProvider::parse("", None).is_err());
        assert!(EnvKeyProvider::parse("nocolon", None).is_err());
        assert!(EnvKeyProvider::parse(&format!("0:{}", b64(1)), None).is_err());
        assert!(EnvKeyProvider::parse("1:c2hvcnQ=", None).is_err());
        assert!(EnvKeyProvider::parse(&format!("1:{},1:{}", b64(1), b64(2)), None).is_err());
        assert!(EnvKeyProvider::parse(&format!("1:{}", b64(1)), Some("3")).is_err());
    }

    #[tokio::test]
    async fn is_read_only() {
        let mut provider = EnvKeyProvider::parse(&format!("1:{}", b64(1)), Some("1")).unwrap();
        assert!(provider.create_key(true).await.is_err());
        assert!(provider.activate(1).await.is_err());
    }
}
