use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{open, random_key, seal};
use crate::error::{CofferError, Result};
use crate::types::MasterKey;

const PAYLOAD_AAD: &[u8] = b"coffer:payload:v1";

/// Length of a wrapped data key: nonce + 32-byte key + tag.
pub const WRAPPED_KEY_LEN: usize = super::NONCE_LEN + 32 + super::TAG_LEN;

/// Per-secret data encryption key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey([u8; 32]);

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// AAD for a wrapped key: ties the blob to the master key version it claims.
fn wrap_aad(version: u32) -> Vec<u8> {
    format!("coffer:dek:v{version}").into_bytes()
}

impl DataKey {
    pub fn generate() -> Self {
        Self(random_key())
    }

    /// Encrypt a secret payload under this key.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        seal(&self.0, plaintext, PAYLOAD_AAD)
    }

    /// Decrypt a payload sealed by [`DataKey::seal`].
    pub fn open(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        open(&self.0, ciphertext, PAYLOAD_AAD).map(Zeroizing::new)
    }

    /// Wrap this key under a master key.
    pub fn wrap(&self, master: &MasterKey) -> Result<Vec<u8>> {
        seal(&master.key, &self.0, &wrap_aad(master.version))
    }

    /// Recover a data key wrapped under `master`.
    pub fn unwrap(wrapped: &[u8], master: &MasterKey) -> Result<Self> {
        if wrapped.len() != WRAPPED_KEY_LEN {
            return Err(CofferError::DecryptionFailed(format!(
                "wrapped key has {} bytes, expected {WRAPPED_KEY_LEN}",
                wrapped.len()
            )));
        }

        let raw = Zeroizing::new(open(&master.key, wrapped, &wrap_aad(master.version))?);
        let key: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            CofferError::DecryptionFailed("unwrapped key has the wrong length".to_string())
        })?;
        Ok(Self(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master(version: u32) -> MasterKey {
        MasterKey {
            version,
            key: random_key(),
        }
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let mk = master(1);
        let dek = DataKey::generate();
        let wrapped = dek.wrap(&mk).unwrap();
        assert_eq!(wrapped.len(), WRAPPED_KEY_LEN);

        let sealed = dek.seal(b"payload").unwrap();
        let recovered = DataKey::unwrap(&wrapped, &mk).unwrap();
        assert_eq!(recovered.open(&sealed).unwrap().as_slice(), b"payload");
    }

    #[test]
    fn unwrap_with_other_master_fails() {
        let dek = DataKey::generate();
        let wrapped = dek.wrap(&master(1)).unwrap();
        assert!(matches!(
            DataKey::unwrap(&wrapped, &master(1)),
            Err(CofferError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn wrapped_key_is_bound_to_version() {
        let mk = master(1);
        let relabelled = MasterKey {
            version: 2,
            key: mk.key,
        };
        let wrapped = DataKey::generate().wrap(&mk).unwrap();
        assert!(DataKey::unwrap(&wrapped, &relabelled).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        assert_eq!(format!("{:?}", DataKey::generate()), "DataKey([REDACTED])");
    }
}
