// Configuration loading.
// Reads the data directory, fetch timeout, and remote dataset list from a TOML file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::paths;
use crate::error::{DataFileError, Result};

/// Environment variable overriding the configured data directory.
pub const DATA_DIR_ENV: &str = "DATAFILES_DATA_DIR";

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// One remote dataset fetched over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteDataset {
    pub key: String,
    pub url: String,
    pub max_age_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub fetch_timeout_secs: Option<u64>,
    #[serde(rename = "dataset")]
    pub datasets: Vec<RemoteDataset>,
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    /// A missing default file yields an empty configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match paths::config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(DataFileError::Config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| DataFileError::Config(e.to_string()))
    }

    /// Resolved data directory: environment override, then config, then platform default.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        self.data_dir
            .clone()
            .or_else(paths::data_dir)
            .ok_or_else(|| DataFileError::Config("no data directory available".to_string()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(
            self.fetch_timeout_secs
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        )
    }
}
