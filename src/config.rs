// Configuration loading

use crate::error::{Result as StoreResult, StoreError};
use crate::models::MAX_TITLE_LEN;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Store and CLI settings
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory; the store lives in `{store_path}/.todostore`
    pub store_path: PathBuf,
    /// Longest accepted task title, in characters (at most 1024)
    pub max_title_len: usize,
    /// How long a writer waits for another connection's lock
    pub busy_timeout_ms: u64,
    /// Log level for the CLI (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("."),
            max_title_len: MAX_TITLE_LEN,
            busy_timeout_ms: 5000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the per-user file
    /// (`{config_dir}/todostore/todostore.yml`) is read if present and the
    /// defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_file(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Per-user config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("todostore").join("todostore.yml"))
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate().map_err(|e| eyre!("{}: {}", path.display(), e))?;
        debug!(path = ?path, "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.max_title_len == 0 || self.max_title_len > MAX_TITLE_LEN {
            return Err(StoreError::Validation(format!(
                "max_title_len must be between 1 and {} (got {})",
                MAX_TITLE_LEN, self.max_title_len
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Parsed log level; unknown names fall back to `info`
    pub fn level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}
