use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use super::KeyValueStorage;
use crate::error::{Result, SyncError};

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";

/// Storage that keeps one JSON file per key inside a directory.
///
/// Keys are base64url-encoded into file names, so any user id is safe to use.
/// Writes go to a temporary sibling file which is then renamed over the
/// target, so a crash mid-write leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Default storage directory under the platform data directory
    /// (e.g. `~/.local/share/questlog/offline`).
    pub fn default_root() -> Result<PathBuf> {
        let base = dirs::data_dir().ok_or(SyncError::NoDataDir)?;
        Ok(base.join("questlog").join("offline"))
    }

    /// Use [`FileStorage::default_root`], creating it if needed.
    pub fn in_default_location() -> Result<Self> {
        Self::new(Self::default_root()?)
    }

    /// The storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
        self.root.join(format!("{}.{}", name, RECORD_EXTENSION))
    }

    fn key_for(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let encoded = name.strip_suffix(&format!(".{}", RECORD_EXTENSION))?;
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::FileRead { path, source: e }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let temp = path.with_extension(TEMP_EXTENSION);
        fs::write(&temp, value).map_err(|e| SyncError::FileWrite {
            path: temp.clone(),
            source: e,
        })?;
        fs::rename(&temp, &path).map_err(|e| SyncError::FileWrite { path, source: e })
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Storage {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(key) = Self::key_for(&entry.path())
                && key.starts_with(prefix)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
