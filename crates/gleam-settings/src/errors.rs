//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("malformed JSON in {}: {source}", path.display())]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Parser error with line and column.
        source: serde_json::Error,
    },
    /// The merged document does not fit the settings schema (wrong types).
    #[error("settings do not match schema: {0}")]
    Schema(#[from] serde_json::Error),
    /// A value that parses but cannot work at runtime.
    #[error("{field}: {reason}")]
    Invalid {
        /// camelCase path of the offending setting (`database.pool.minIdle`).
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    /// Field path of an [`Invalid`](Self::Invalid) error.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
