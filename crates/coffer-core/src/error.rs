use thiserror::Error;

#[derive(Debug, Error)]
pub enum CofferError {
    // IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Config
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration file not found at {0} (run `coffer init` first)")]
    ConfigNotFound(String),

    // Keys
    #[error("Unknown master key version: {0}")]
    UnknownKeyVersion(u32),

    // Crypto
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    // Store
    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Serialization
    #[error("TOML deserialization error: {0}")]
    TomlDe(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),
}

impl CofferError {
    /// Errors that abort a whole rotation run rather than a single record.
    pub fn is_fatal_for_rotation(&self) -> bool {
        !matches!(
            self,
            CofferError::UnknownKeyVersion(_)
                | CofferError::DecryptionFailed(_)
                | CofferError::Encryption(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CofferError>;
