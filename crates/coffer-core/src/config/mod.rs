use crate::error::{CofferError, Result};
use crate::rotation::DEFAULT_BATCH_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level Coffer configuration stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CofferConfig {
    pub coffer: CofferSettings,
    #[serde(default)]
    pub rotation: RotationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CofferSettings {
    /// Path to the SQLite credential database.
    pub db_path: String,
    /// Master key source ("local" or "env").
    #[serde(default = "default_key_provider")]
    pub key_provider: String,
    /// Path to the encrypted keyfile (for the local key provider).
    #[serde(default = "default_keyfile_path")]
    pub keyfile_path: String,
    /// Environment variable prefix (for the env key provider).
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Records re-wrapped per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_key_provider() -> String {
    "local".to_string()
}

fn default_keyfile_path() -> String {
    "keys.enc".to_string()
}

fn default_env_prefix() -> String {
    "COFFER".to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl CofferConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CofferError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| CofferError::TomlDe(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CofferError::TomlSer(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.rotation.batch_size == 0 {
            return Err(CofferError::Configuration(
                "rotation.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Default config for `coffer init`.
    pub fn default_config(base_dir: &Path) -> Self {
        Self {
            coffer: CofferSettings {
                db_path: base_dir.join("coffer.db").display().to_string(),
                key_provider: default_key_provider(),
                keyfile_path: base_dir.join("keys.enc").display().to_string(),
                env_prefix: default_env_prefix(),
            },
            rotation: RotationConfig::default(),
        }
    }

    /// Resolve the config file path: `<base_dir>/coffer.toml`
    pub fn default_path(base_dir: &Path) -> PathBuf {
        base_dir.join("coffer.toml")
    }

    /// Resolve the default coffer home directory: `~/.coffer`
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".coffer"))
            .ok_or_else(|| CofferError::Configuration("Cannot determine home directory".to_string()))
    }
}
