use async_trait::async_trait;
use sha2::{Digest, Sha256};
use zeroize::ZeroizeOnDrop;

/// A versioned 256-bit master key with metadata.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ManagedKey {
    #[zeroize(skip)]
    pub version: u32,
    pub key: [u8; 32],
    #[zeroize(skip)]
    pub created_at: String,
}

impl ManagedKey {
    /// Short SHA-256 fingerprint for display; never the key itself.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        hex::encode(&digest[..8])
    }
}

impl std::fmt::Debug for ManagedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedKey")
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Trait for master key backends.
///
/// Providers are only consulted when a process starts (to build the key
/// registry) and by operator commands that provision keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Version new secrets should be wrapped under, if one is set.
    async fn current_version(&self) -> anyhow::Result<Option<u32>>;

    /// Get a specific key by version (for unwrapping older records).
    async fn get_key(&self, version: u32) -> anyhow::Result<ManagedKey>;

    /// All keys, ascending by version.
    async fn list_keys(&self) -> anyhow::Result<Vec<ManagedKey>>;

    /// Provision the next key version, optionally making it current.
    async fn create_key(&mut self, activate: bool) -> anyhow::Result<ManagedKey>;

    /// Make an existing version current.
    async fn activate(&mut self, version: u32) -> anyhow::Result<()>;
}
