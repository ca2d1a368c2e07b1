use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CofferError;

/// A versioned master key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    #[zeroize(skip)]
    pub version: u32,
    pub key: [u8; 32],
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// The three fields persisted for every secret.
///
/// `ciphertext` and `wrapped_key` are raw bytes (`nonce || sealed || tag`).
/// They are stored as BLOBs; the text form produced by [`EncryptedSecret::to_envelope`]
/// is only for moving a secret outside the store.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub wrapped_key: Vec<u8>,
    pub key_version: u32,
}

impl EncryptedSecret {
    /// Single-line text form: `v{version}:{base64 wrapped_key}:{base64 ciphertext}`.
    pub fn to_envelope(&self) -> String {
        format!(
            "v{}:{}:{}",
            self.key_version,
            STANDARD.encode(&self.wrapped_key),
            STANDARD.encode(&self.ciphertext)
        )
    }

    /// Parse the text form produced by [`EncryptedSecret::to_envelope`].
    pub fn from_envelope(s: &str) -> Result<Self, CofferError> {
        let parts: Vec<&str> = s.trim().splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(CofferError::InvalidEnvelope(
                "expected v<version>:<wrapped_key>:<ciphertext>".to_string(),
            ));
        }

        let key_version = parts[0]
            .strip_prefix('v')
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| CofferError::InvalidEnvelope(format!("bad version '{}'", parts[0])))?;
        let wrapped_key = STANDARD
            .decode(parts[1])
            .map_err(|e| CofferError::InvalidEnvelope(format!("wrapped key: {e}")))?;
        let ciphertext = STANDARD
            .decode(parts[2])
            .map_err(|e| CofferError::InvalidEnvelope(format!("ciphertext: {e}")))?;

        Ok(Self {
            ciphertext,
            wrapped_key,
            key_version,
        })
    }
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("key_version", &self.key_version)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("wrapped_key_len", &self.wrapped_key.len())
            .finish()
    }
}

/// A credential row as stored in the database.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub secret: EncryptedSecret,
    pub created_at: String,
    pub updated_at: String,
}

/// Credential listing entry (no secret material).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub key_version: u32,
    pub updated_at: String,
}

/// Number of credentials wrapped under one master key version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionStat {
    pub key_version: u32,
    pub credentials: u64,
}

/// Rotation run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl fmt::Display for RotationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationStatus::Running => write!(f, "running"),
            RotationStatus::Completed => write!(f, "completed"),
            RotationStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            RotationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RotationStatus {
    type Err = CofferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RotationStatus::Running),
            "completed" => Ok(RotationStatus::Completed),
            "completed_with_errors" => Ok(RotationStatus::CompletedWithErrors),
            "failed" => Ok(RotationStatus::Failed),
            _ => Err(CofferError::Configuration(format!(
                "invalid rotation status: {s}"
            ))),
        }
    }
}

/// Audit row for one rotation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationRunRecord {
    pub id: String,
    pub from_version: Option<u32>,
    pub to_version: u32,
    pub status: RotationStatus,
    pub candidates: u64,
    pub processed: u64,
    pub errors: u64,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Which records a rotation run touches.
///
/// With `from_version` set, only records wrapped under exactly that version are
/// selected; otherwise every record older than `to_version` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSelection {
    pub from_version: Option<u32>,
    pub to_version: u32,
}

impl RotationSelection {
    /// Would a record stored under `key_version` be rotated by this run?
    pub fn matches(&self, key_version: u32) -> bool {
        match self.from_version {
            Some(from) => key_version == from,
            None => key_version < self.to_version,
        }
    }

    /// SQL predicate on `key_version` (bound to `?1`) and its parameter.
    pub(crate) fn sql_predicate(&self) -> (&'static str, u32) {
        match self.from_version {
            Some(from) => ("key_version = ?1", from),
            None => ("key_version < ?1", self.to_version),
        }
    }
}

/// A record the rotation driver could not re-wrap.
#[derive(Debug)]
pub struct RecordFailure {
    pub record_id: i64,
    pub owner: String,
    pub name: String,
    pub key_version: u32,
    pub error: CofferError,
}
