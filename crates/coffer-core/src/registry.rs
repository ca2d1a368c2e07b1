use std::collections::BTreeMap;

use crate::error::{CofferError, Result};
use crate::types::MasterKey;

/// Immutable, versioned set of master keys.
///
/// Built once from whatever provisioned the keys and shared (usually behind an
/// `Arc`) by every service that wraps or unwraps data keys. Old versions stay
/// registered so records that have not been rotated yet can still be read.
#[derive(Debug)]
pub struct MasterKeyRegistry {
    keys: BTreeMap<u32, MasterKey>,
    current: Option<u32>,
}

impl MasterKeyRegistry {
    pub fn new(keys: impl IntoIterator<Item = MasterKey>, current: Option<u32>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for key in keys {
            if key.version == 0 {
                return Err(CofferError::Configuration(
                    "master key versions start at 1".to_string(),
                ));
            }
            let version = key.version;
            if map.insert(version, key).is_some() {
                return Err(CofferError::Configuration(format!(
                    "master key version {version} registered twice"
                )));
            }
        }

        if let Some(v) = current {
            if !map.contains_key(&v) {
                return Err(CofferError::Configuration(format!(
                    "current master key version {v} is not registered"
                )));
            }
        }

        Ok(Self { keys: map, current })
    }

    /// The version new secrets are wrapped under.
    pub fn current_version(&self) -> Result<u32> {
        self.current.ok_or_else(|| {
            CofferError::Configuration("no current master key version configured".to_string())
        })
    }

    pub fn current_key(&self) -> Result<&MasterKey> {
        let version = self.current_version()?;
        self.key(version)
    }

    pub fn key(&self, version: u32) -> Result<&MasterKey> {
        self.keys
            .get(&version)
            .ok_or(CofferError::UnknownKeyVersion(version))
    }

    pub fn contains(&self, version: u32) -> bool {
        self.keys.contains_key(&version)
    }

    /// Registered versions, ascending.
    pub fn versions(&self) -> Vec<u32> {
        self.keys.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(version: u32) -> MasterKey {
        MasterKey {
            version,
            key: [version as u8; 32],
        }
    }

    #[test]
    fn lookup_by_version() {
        let registry = MasterKeyRegistry::new([key(1), key(3), key(2)], Some(3)).unwrap();
        assert_eq!(registry.current_version().unwrap(), 3);
        assert_eq!(registry.current_key().unwrap().key, [3; 32]);
        assert_eq!(registry.key(1).unwrap().key, [1; 32]);
        assert_eq!(registry.versions(), vec![1, 2, 3]);
        assert!(registry.contains(2));
        assert!(!registry.contains(4));
    }

    #[test]
    fn unknown_version_is_reported() {
        let registry = MasterKeyRegistry::new([key(1)], Some(1)).unwrap();
        assert!(matches!(
            registry.key(9),
            Err(CofferError::UnknownKeyVersion(9))
        ));
    }

    #[test]
    fn missing_current_is_configuration_error() {
        let registry = MasterKeyRegistry::new([key(1)], None).unwrap();
        assert!(matches!(
            registry.current_version(),
            Err(CofferError::Configuration(_))
        ));
        // Old keys stay readable without a current version.
        assert!(registry.key(1).is_ok());
    }

    #[test]
    fn rejects_invalid_key_sets() {
        assert!(MasterKeyRegistry::new([key(0)], None).is_err());
        assert!(MasterKeyRegistry::new([key(1), key(1)], Some(1)).is_err());
        assert!(MasterKeyRegistry::new([key(1)], Some(2)).is_err());
    }
}
