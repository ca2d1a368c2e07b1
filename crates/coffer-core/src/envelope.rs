//! Envelope encryption over a [`MasterKeyRegistry`].
//!
//! Each secret gets its own random data key (DEK). The payload is sealed with
//! the DEK and the DEK is wrapped under a versioned master key. Rotating a
//! master key only re-wraps the 60-byte DEK blob; payload ciphertext is never
//! rewritten.

use std::sync::Arc;

use crate::crypto::DataKey;
use crate::error::{CofferError, Result};
use crate::registry::MasterKeyRegistry;
use crate::types::EncryptedSecret;

pub struct EnvelopeService {
    registry: Arc<MasterKeyRegistry>,
}

impl EnvelopeService {
    pub fn new(registry: Arc<MasterKeyRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MasterKeyRegistry {
        &self.registry
    }

    /// Encrypt a secret under a fresh DEK wrapped by the current master key.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret> {
        let master = self.registry.current_key()?;
        let dek = DataKey::generate();

        let ciphertext = dek.seal(plaintext.as_bytes())?;
        let wrapped_key = dek.wrap(master)?;

        Ok(EncryptedSecret {
            ciphertext,
            wrapped_key,
            key_version: master.version,
        })
    }

    pub fn decrypt(&self, ciphertext: &[u8], wrapped_key: &[u8], key_version: u32) -> Result<String> {
        let master = self.registry.key(key_version)?;
        let dek = DataKey::unwrap(wrapped_key, master)?;
        let plaintext = dek.open(ciphertext)?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CofferError::DecryptionFailed("plaintext is not valid UTF-8".to_string()))
    }

    pub fn decrypt_secret(&self, secret: &EncryptedSecret) -> Result<String> {
        self.decrypt(&secret.ciphertext, &secret.wrapped_key, secret.key_version)
    }

    /// Re-wrap the DEK of a secret from `from_version` to `to_version`.
    ///
    /// The returned ciphertext is the input ciphertext, byte for byte. The
    /// payload is still authenticated with the unwrapped DEK before the new
    /// wrapped key is produced, so a record whose payload no longer matches its
    /// key is rejected rather than migrated.
    pub fn re_encrypt(
        &self,
        ciphertext: &[u8],
        wrapped_key: &[u8],
        from_version: u32,
        to_version: u32,
    ) -> Result<EncryptedSecret> {
        let target = self.registry.key(to_version).map_err(|_| {
            CofferError::Configuration(format!(
                "target master key version {to_version} is not registered"
            ))
        })?;
        let source = self.registry.key(from_version)?;

        let dek = DataKey::unwrap(wrapped_key, source)?;
        dek.open(ciphertext)?;

        Ok(EncryptedSecret {
            ciphertext: ciphertext.to_vec(),
            wrapped_key: dek.wrap(target)?,
            key_version: to_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_key;
    use crate::types::MasterKey;

    fn service(versions: &[u32], current: u32) -> EnvelopeService {
        let keys = versions.iter().map(|&version| MasterKey {
            version,
            key: random_key(),
        });
        EnvelopeService::new(Arc::new(
            MasterKeyRegistry::new(keys, Some(current)).unwrap(),
        ))
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let svc = service(&[1, 2], 2);
        let long = "x".repeat(10_000);
        for plaintext in ["", "hunter2", "pässwörd 🔑", long.as_str()] {
            let secret = svc.encrypt(plaintext).unwrap();
            assert_eq!(secret.key_version, 2);
            assert_eq!(svc.decrypt_secret(&secret).unwrap(), plaintext);
        }
    }

    #[test]
    fn encrypt_is_not_deterministic() {
        let svc = service(&[1], 1);
        let a = svc.encrypt("same secret").unwrap();
        let b = svc.encrypt("same secret").unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.wrapped_key, b.wrapped_key);
    }

    #[test]
    fn encrypt_without_current_version_fails() {
        let registry = MasterKeyRegistry::new(
            [MasterKey {
                version: 1,
                key: random_key(),
            }],
            None,
        )
        .unwrap();
        let svc = EnvelopeService::new(Arc::new(registry));
        assert!(matches!(
            svc.encrypt("x"),
            Err(CofferError::Configuration(_))
        ));
    }

    #[test]
    fn any_flipped_bit_is_detected() {
        let svc = service(&[1], 1);
        let secret = svc.encrypt("tamper me").unwrap();

        for i in 0..secret.ciphertext.len() * 8 {
            let mut ct = secret.ciphertext.clone();
            ct[i / 8] ^= 1 << (i % 8);
            let result = svc.decrypt(&ct, &secret.wrapped_key, 1);
            assert!(matches!(result, Err(CofferError::DecryptionFailed(_))), "ciphertext bit {i}");
        }

        for i in 0..secret.wrapped_key.len() * 8 {
            let mut wk = secret.wrapped_key.clone();
            wk[i / 8] ^= 1 << (i % 8);
            let result = svc.decrypt(&secret.ciphertext, &wk, 1);
            assert!(matches!(result, Err(CofferError::DecryptionFailed(_))), "wrapped key bit {i}");
        }
    }

    #[test]
    fn unknown_version_on_decrypt() {
        let svc = service(&[1], 1);
        let secret = svc.encrypt("s").unwrap();
        assert!(matches!(
            svc.decrypt(&secret.ciphertext, &secret.wrapped_key, 5),
            Err(CofferError::UnknownKeyVersion(5))
        ));
    }

    #[test]
    fn wrong_version_label_fails_decrypt() {
        let svc = service(&[1, 2], 1);
        let secret = svc.encrypt("s").unwrap();
        assert!(matches!(
            svc.decrypt(&secret.ciphertext, &secret.wrapped_key, 2),
            Err(CofferError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn re_encrypt_keeps_ciphertext_and_plaintext() {
        let svc = service(&[1, 2, 3], 1);
        let original = svc.encrypt("secret-A").unwrap();

        let rotated = svc
            .re_encrypt(&original.ciphertext, &original.wrapped_key, 1, 3)
            .unwrap();

        assert_eq!(rotated.key_version, 3);
        assert_eq!(rotated.ciphertext, original.ciphertext);
        assert_ne!(rotated.wrapped_key, original.wrapped_key);
        assert_eq!(svc.decrypt_secret(&rotated).unwrap(), "secret-A");
        // The old wrapping no longer matches the new version.
        assert!(svc.decrypt(&rotated.ciphertext, &original.wrapped_key, 3).is_err());
    }

    #[test]
    fn re_encrypt_error_kinds() {
        let svc = service(&[1, 2], 1);
        let secret = svc.encrypt("s").unwrap();

        assert!(matches!(
            svc.re_encrypt(&secret.ciphertext, &secret.wrapped_key, 1, 9),
            Err(CofferError::Configuration(_))
        ));
        assert!(matches!(
            svc.re_encrypt(&secret.ciphertext, &secret.wrapped_key, 7, 2),
            Err(CofferError::UnknownKeyVersion(7))
        ));

        let mut corrupted = secret.ciphertext.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;
        assert!(matches!(
            svc.re_encrypt(&corrupted, &secret.wrapped_key, 1, 2),
            Err(CofferError::DecryptionFailed(_))
        ));
    }
}
