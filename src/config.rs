//! Configuration for commonpot

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consensus::Thresholds;
use crate::db::DATABASE_FILE;
use crate::error::LedgerError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("commonpot")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the ledger database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Display name of the community pool user, created on first start
    #[serde(default = "default_community_user_name")]
    pub community_user_name: String,

    /// Refund voting thresholds
    #[serde(default)]
    pub community: Thresholds,

    /// Callback delivery
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Callback delivery settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Pending notifications kept before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-request timeout for callback GETs
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_http_port() -> u16 {
    8095
}

fn default_community_user_name() -> String {
    "Community".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_request_timeout_ms() -> u64 {
    2000
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl NotifierConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            community_user_name: default_community_user_name(),
            community: Thresholds::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> Result<(), LedgerError> {
        self.community.validate()?;
        if self.notifier.queue_capacity == 0 {
            return Err(LedgerError::Config("notifier.queue_capacity must be positive".into()));
        }
        if self.community_user_name.trim().is_empty() {
            return Err(LedgerError::Config("community_user_name must not be empty".into()));
        }
        Ok(())
    }

    /// Get ledger database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(DATABASE_FILE)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
