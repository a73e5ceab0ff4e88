//! Engine configuration (`tessera.toml`).
//!
//! ```toml
//! database = "/var/lib/tessera/tessera.sqlite3"
//!
//! [publishing]
//! withdrawal_mode = "physical"
//! lock_hierarchy = true
//! dialect = "postgres"
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use crate::ddl::SqlDialect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// What withdrawing (or deleting a field) does to the physical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalMode {
    /// Metadata only; the table or column stays.
    #[default]
    Logical,
    /// Also drop the table or column.
    Physical,
}

impl WithdrawalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logical => "logical",
            Self::Physical => "physical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "logical" => Some(Self::Logical),
            "physical" => Some(Self::Physical),
            _ => None,
        }
    }
}

impl std::fmt::Display for WithdrawalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    pub withdrawal_mode: WithdrawalMode,
    /// Lock child entities along with a published parent.
    pub lock_hierarchy: bool,
    /// Dialect used for rendered SQL (previews and `ddl` export).
    pub dialect: SqlDialect,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            withdrawal_mode: WithdrawalMode::Logical,
            lock_hierarchy: false,
            dialect: SqlDialect::Postgres,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Metadata database path. `None` means the default under the home dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub publishing: PublishingConfig,
}

impl EngineConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml_string()?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, text).map_err(write_err)
    }

    /// Configured database path, or `default` when unset.
    pub fn database_path(&self, default: &Path) -> PathBuf {
        self.database.clone().unwrap_or_else(|| default.to_path_buf())
    }
}
