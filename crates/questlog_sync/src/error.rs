use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::remote::RemoteError;

/// Unified error type for questlog sync operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// Generic IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A file could not be read
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        /// File that was read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// A file could not be written
    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        /// File that was written
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// A record could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The storage backend failed for a key
    #[error("Storage error for key '{key}': {message}")]
    Storage {
        /// Affected storage key
        key: String,
        /// Backend error message
        message: String,
    },

    /// The user id is empty or blank
    #[error("Invalid user id: '{0}'")]
    InvalidUserId(String),

    /// The TOML config could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// The platform has no data directory
    #[error("Could not determine data directory")]
    NoDataDir,

    /// A remote call failed
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// A remote call did not finish in time
    #[error("Remote call timed out after {millis} ms")]
    Timeout {
        /// Configured timeout
        millis: u64,
    },
}

/// Result type alias for questlog sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// A serializable representation of SyncError for IPC (e.g., a UI bridge)
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Associated path (if applicable)
    pub path: Option<PathBuf>,
}

impl From<&SyncError> for SerializableError {
    fn from(err: &SyncError) -> Self {
        let kind = match err {
            SyncError::Io(_) => "Io",
            SyncError::FileRead { .. } => "FileRead",
            SyncError::FileWrite { .. } => "FileWrite",
            SyncError::Json(_) => "Json",
            SyncError::Storage { .. } => "Storage",
            SyncError::InvalidUserId(_) => "InvalidUserId",
            SyncError::ConfigParse(_) => "ConfigParse",
            SyncError::ConfigSerialize(_) => "ConfigSerialize",
            SyncError::NoDataDir => "NoDataDir",
            SyncError::Remote(_) => "Remote",
            SyncError::Timeout { .. } => "Timeout",
        }
        .to_string();

        let path = match err {
            SyncError::FileRead { path, .. } => Some(path.clone()),
            SyncError::FileWrite { path, .. } => Some(path.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            path,
        }
    }
}

impl From<SyncError> for SerializableError {
    fn from(err: SyncError) -> Self {
        SerializableError::from(&err)
    }
}

impl SyncError {
    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializable_kind_and_path() {
        let err = SyncError::FileWrite {
            path: PathBuf::from("/tmp/record.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let serializable = err.to_serializable();
        assert_eq!(serializable.kind, "FileWrite");
        assert_eq!(serializable.path, Some(PathBuf::from("/tmp/record.json")));
        assert!(serializable.message.contains("denied"));
    }

    #[test]
    fn test_remote_error_converts() {
        let err: SyncError = RemoteError::Transport("connection reset".into()).into();
        let serializable = SerializableError::from(err);
        assert_eq!(serializable.kind, "Remote");
        assert!(serializable.path.is_none());
    }
}
