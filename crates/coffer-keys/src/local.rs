use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::provider::{KeyProvider, ManagedKey};

const KEYSTORE_FORMAT: u32 = 1;
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// File-based master key store.
///
/// The keyfile holds every master key version ever provisioned, encrypted as a
/// whole with AES-256-GCM under a key derived from the operator passphrase
/// with Argon2id.
///
/// File layout: `salt (32) || nonce (12) || AES-256-GCM(json keystore)`.
pub struct LocalKeyProvider {
    keyfile_path: PathBuf,
    file_key: [u8; 32],
    keystore: KeyStore,
}

#[derive(Serialize, Deserialize)]
struct KeyStore {
    /// Version for forward compatibility.
    format: u32,
    /// Argon2id salt.
    salt: [u8; SALT_LEN],
    current_version: Option<u32>,
    keys: Vec<StoredKey>,
}

#[derive(Serialize, Deserialize)]
struct StoredKey {
    version: u32,
    #[serde(with = "base64_key")]
    key: [u8; 32],
    created_at: String,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("format", &self.format)
            .field("salt", &"[REDACTED]")
            .field("current_version", &self.current_version)
            .field("keys", &self.keys)
            .finish()
    }
}

impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKey")
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Serde helper for a 32-byte key as base64.
mod base64_key {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        use serde::de::Error;
        let s = String::deserialize(d)?;
        let bytes = STANDARD.decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("master key must be 32 bytes"))
    }
}

impl LocalKeyProvider {
    /// Derive the keyfile encryption key from the passphrase using Argon2id.
    fn derive_file_key(passphrase: &[u8], salt: &[u8; SALT_LEN]) -> anyhow::Result<[u8; 32]> {
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase, salt, &mut key)
            .map_err(|e| anyhow::anyhow!("Argon2id key derivation failed: {e}"))?;
        Ok(key)
    }

    fn encrypt_keystore(keystore: &KeyStore, file_key: &[u8; 32]) -> anyhow::Result<Vec<u8>> {
        let mut plaintext = serde_json::to_vec(keystore)?;
        let cipher = Aes256Gcm::new_from_slice(file_key)
            .map_err(|e| anyhow::anyhow!("Invalid keyfile key: {e}"))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| anyhow::anyhow!("Keystore encryption failed: {e}"));
        plaintext.zeroize();
        let ciphertext = ciphertext?;

        let mut output = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&keystore.salt);
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    fn decrypt_keystore(data: &[u8], passphrase: &[u8]) -> anyhow::Result<(KeyStore, [u8; 32])> {
        if data.len() < SALT_LEN + NONCE_LEN {
            anyhow::bail!("Keyfile too short");
        }

        let salt: [u8; SALT_LEN] = data[..SALT_LEN].try_into()?;
        let nonce_bytes: [u8; NONCE_LEN] = data[SALT_LEN..SALT_LEN + NONCE_LEN].try_into()?;
        let ciphertext = &data[SALT_LEN + NONCE_LEN..];

        let file_key = Self::derive_file_key(passphrase, &salt)?;
        let cipher = Aes256Gcm::new_from_slice(&file_key)
            .map_err(|e| anyhow::anyhow!("Invalid keyfile key: {e}"))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow::anyhow!("Wrong passphrase or corrupted keyfile"))?;

        let keystore = serde_json::from_slice::<KeyStore>(&plaintext);
        plaintext.zeroize();
        let keystore = keystore?;

        if keystore.format != KEYSTORE_FORMAT {
            anyhow::bail!("Unsupported keyfile format {}", keystore.format);
        }
        if keystore.salt != salt {
            anyhow::bail!("Keyfile header does not match its contents");
        }
        Ok((keystore, file_key))
    }

    /// Save the keystore to disk (encrypted), replacing the old file atomically.
    fn save(&self) -> anyhow::Result<()> {
        let data = Self::encrypt_keystore(&self.keystore, &self.file_key)?;
        if let Some(parent) = self.keyfile_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.keyfile_path.with_extension("tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &self.keyfile_path)?;
        Ok(())
    }

    fn next_version(&self) -> u32 {
        self.keystore
            .keys
            .iter()
            .map(|k| k.version)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn to_managed(stored: &StoredKey) -> ManagedKey {
        ManagedKey {
            version: stored.version,
            key: stored.key,
            created_at: stored.created_at.clone(),
        }
    }

    /// Create a new keyfile holding master key version 1 (current).
    pub fn create(keyfile_path: &Path, passphrase: &[u8]) -> anyhow::Result<Self> {
        if keyfile_path.exists() {
            anyhow::bail!("Keyfile already exists: {}", keyfile_path.display());
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let file_key = Self::derive_file_key(passphrase, &salt)?;

        let mut provider = Self {
            keyfile_path: keyfile_path.to_path_buf(),
            file_key,
            keystore: KeyStore {
                format: KEYSTORE_FORMAT,
                salt,
                current_version: None,
                keys: vec![],
            },
        };
        provider.push_new_key(true);
        provider.save()?;
        Ok(provider)
    }

    /// Open an existing keyfile.
    pub fn open(keyfile_path: &Path, passphrase: &[u8]) -> anyhow::Result<Self> {
        let data = std::fs::read(keyfile_path).map_err(|e| {
            anyhow::anyhow!("Cannot read keyfile {}: {e}", keyfile_path.display())
        })?;
        let (keystore, file_key) = Self::decrypt_keystore(&data, passphrase)?;

        Ok(Self {
            keyfile_path: keyfile_path.to_path_buf(),
            file_key,
            keystore,
        })
    }

    fn push_new_key(&mut self, activate: bool) -> ManagedKey {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        let stored = StoredKey {
            version: self.next_version(),
            key,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        key.zeroize();

        let managed = Self::to_managed(&stored);
        if activate {
            self.keystore.current_version = Some(stored.version);
        }
        self.keystore.keys.push(stored);
        managed
    }
}

impl Drop for LocalKeyProvider {
    fn drop(&mut self) {
        self.file_key.zeroize();
        for key in &mut self.keystore.keys {
            key.key.zeroize();
        }
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn current_version(&self) -> anyhow::Result<Option<u32>> {
        Ok(self.keystore.current_version)
    }

    async fn get_key(&self, version: u32) -> anyhow::Result<ManagedKey> {
        self.keystore
            .keys
            .iter()
            .find(|k| k.version == version)
            .map(Self::to_managed)
            .ok_or_else(|| anyhow::anyhow!("Master key version {version} not found"))
    }

    async fn list_keys(&self) -> anyhow::Result<Vec<ManagedKey>> {
        let mut keys: Vec<ManagedKey> = self.keystore.keys.iter().map(Self::to_managed).collect();
        keys.sort_by_key(|k| k.version);
        Ok(keys)
    }

    async fn create_key(&mut self, activate: bool) -> anyhow::Result<ManagedKey> {
        let managed = self.push_new_key(activate);
        self.save()?;
        tracing::info!(version = managed.version, activate, "Provisioned master key");
        Ok(managed)
    }

    async fn activate(&mut self, version: u32) -> anyhow::Result<()> {
        if !self.keystore.keys.iter().any(|k| k.version == version) {
            anyhow::bail!("Master key version {version} not found");
        }
        self.keystore.current_version = Some(version);
        self.save()?;
        tracing::info!(version, "Activated master key");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_and_open_keyfile() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");
        let passphrase = b"test-passphrase-123";

        let provider = LocalKeyProvider::create(&path, passphrase).unwrap();
        assert_eq!(provider.current_version().await.unwrap(), Some(1));
        let key1 = provider.get_key(1).await.unwrap();

        let reopened = LocalKeyProvider::open(&path, passphrase).unwrap();
        assert_eq!(reopened.current_version().await.unwrap(), Some(1));
        let key2 = reopened.get_key(1).await.unwrap();
        assert_eq!(key1.key, key2.key);
        assert_eq!(key1.created_at, key2.created_at);
    }

    #[tokio::test]
    async fn create_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");
        LocalKeyProvider::create(&path, b"pass").unwrap();
        assert!(LocalKeyProvider::create(&path, b"pass").is_err());
    }

    #[tokio::test]
    async fn wrong_passphrase_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");

        LocalKeyProvider::create(&path, b"correct").unwrap();
        let result = LocalKeyProvider::open(&path, b"wrong");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn corrupted_keyfile_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");
        LocalKeyProvider::create(&path, b"pass").unwrap();

        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        std::fs::write(&path, &data).unwrap();
        assert!(LocalKeyProvider::open(&path, b"pass").is_err());

        std::fs::write(&path, b"short").unwrap();
        assert!(LocalKeyProvider::open(&path, b"pass").is_err());
    }

    #[tokio::test]
    async fn staged_key_then_activate() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.enc");

        let mut provider = LocalKeyProvider::create(&path, b"pass").unwrap();
        let v1 = provider.get_key(1).await.unwrap();

        let v2 = provider.create_key(false).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_ne!(v1.key, v2.key);
        assert_eq!(provider.current_version().await.unwrap(), Some(1));

        provider.activate(2).await.unwrap();
        assert!(provider.activate(9).await.is_err());

        let v3 = provider.create_key(true).await.unwrap();
        assert_eq!(v3.version, 3);

        // Persisted, and old keys are still there.
        let reopened = LocalKeyProvider::open(&path, b"pass").unwrap();
        assert_eq!(reopened.current_version().await.unwrap(), Some(3));
        let versions: Vec<u32> = reopened
            .list_keys()
            .await
            .unwrap()
            .iter()
            .map(|k| k.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(reopened.get_key(1).await.unwrap().key, v1.key);
        assert!(reopened.get_key(4).await.is_err());
    }

    #[test]
    fn keystore_debug_redacts_keys() {
        let keystore = KeyStore {
            format: KEYSTORE_FORMAT,
            salt: [0x5a; SALT_LEN],
            current_version: Some(1),
            keys: vec![StoredKey {
                version: 1,
                key: [0xab; 32],
                created_at: "now".to_string(),
            }],
        };
        let debug = format!("{keystore:?}");
        assert!(debug.contains("REDACTED"));
        assert!(debug.contains("version: 1"));
        assert!(!debug.contains("171"));
        assert!(!debug.contains("90"));
    }

    #[tokio::test]
    async fn different_keyfiles_get_different_keys() {
        let tmp = TempDir::new().unwrap();
        let p1 = LocalKeyProvider::create(&tmp.path().join("a.enc"), b"same").unwrap();
        let p2 = LocalKeyProvider::create(&tmp.path().join("b.enc"), b"same").unwrap();

        let k1 = p1.get_key(1).await.unwrap();
        let k2 = p2.get_key(1).await.unwrap();
        assert_ne!(k1.key, k2.key);
    }
}
