//! Configuration types for the offline sync layer.
//!
//! This module provides the [`SyncConfig`] struct which controls how records
//! are keyed in durable storage, how aggressively the sync engine retries, and
//! which optional behaviors of the façade are enabled. Configuration is
//! persisted as TOML.
//!
//! # Key Configuration Fields
//!
//! - `storage_key_prefix`: Prefix of the per-user record key
//! - `max_retries`: Failed attempts tolerated before an action is dropped
//! - `remote_timeout_ms`: Timeout applied to every remote call
//! - `always_queue`: Queue mutations even while online
//! - `broadcast_activity` / `reconcile_after_sync`: Optional façade behaviors
//!
//! # Example
//!
//! ```ignore
//! use questlog_sync::config::SyncConfig;
//!
//! let config = SyncConfig::from_toml_str("max_retries = 5")?;
//! assert_eq!(config.max_retries, 5);
//! assert_eq!(config.storage_key_prefix, "rpg_offline_");
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Default prefix for per-user record keys.
pub const DEFAULT_KEY_PREFIX: &str = "rpg_offline_";

/// Default number of failures tolerated before an action is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default timeout for a single remote call, in milliseconds.
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;

/// `SyncConfig` holds the tunable parts of the offline sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Prefix prepended to the user id to form the durable storage key
    pub storage_key_prefix: String,

    /// An action whose retry count exceeds this value is dropped
    pub max_retries: u32,

    /// Timeout for each remote call; a timeout counts as a failed attempt
    pub remote_timeout_ms: u64,

    /// Enqueue every mutation, not only the ones made while offline
    pub always_queue: bool,

    /// Broadcast queued actions to other sessions while online (best effort)
    pub broadcast_activity: bool,

    /// After a pass that drains the queue, merge the remote view into the cache
    pub reconcile_after_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            always_queue: false,
            broadcast_activity: true,
            reconcile_after_sync: true,
        }
    }
}

impl SyncConfig {
    /// Remote call timeout as a [`Duration`]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Parse a config from TOML. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Serialize this config as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| SyncError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Save config to a specific path, creating the parent directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = self.to_toml_string()?;
        std::fs::write(path, contents).map_err(|e| SyncError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load config from a path, returning the default if it is missing or invalid.
    pub fn load_from_or_default(path: &Path) -> Self {
        match Self::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default sync config ({})", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.storage_key_prefix, "rpg_offline_");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.remote_timeout(), Duration::from_secs(10));
        assert!(!config.always_queue);
        assert!(config.reconcile_after_sync);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str("max_retries = 5\nalways_queue = true\n").unwrap();
        assert_eq!(config.max_retries, 5);
        assert!(config.always_queue);
        assert_eq!(config.storage_key_prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(config.remote_timeout_ms, DEFAULT_REMOTE_TIMEOUT_MS);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = SyncConfig::from_toml_str("max_retries = \"lots\"").unwrap_err();
        assert!(matches!(err, SyncError::ConfigParse(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        let config = SyncConfig {
            remote_timeout_ms: 2_500,
            broadcast_activity: false,
            ..SyncConfig::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(SyncConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load_from_or_default(&dir.path().join("missing.toml"));
        assert_eq!(config, SyncConfig::default());
    }
}
