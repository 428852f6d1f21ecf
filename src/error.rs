// Error types for the datafiles crate.
// Covers registry lookups, durable storage, remote fetches, and configuration.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataFileError {
    #[error("No data file definition found for {0}")]
    NotFound(String),

    #[error("Data file {0} is already registered")]
    DuplicateKey(String),

    #[error("Stored data for {key} is unreadable: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Fetching {key} failed: {reason}")]
    Fetch { key: String, reason: String },

    #[error("Persisting {path} failed: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataFileError {
    pub fn fetch(key: &str, reason: impl Into<String>) -> Self {
        DataFileError::Fetch {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        DataFileError::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error means "nothing stored yet" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataFileError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, DataFileError>;
