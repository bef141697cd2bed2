//! Durable local key-value storage for session state and fallback snapshots.
//!
//! Layout (`FileStorage`):
//!   {dir}/{prefix}.current_user        → user id string
//!   {dir}/{prefix}.auth_token          → token string
//!   {dir}/{prefix}.fallback_{kind}     → JSON array of canonical records
//!
//! All keys are namespaced under a configurable prefix so several panel
//! users (or a test and a live profile) can share one directory.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

/// String key → string value store that outlives the process.
pub trait LocalStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    prefix: String,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn open(dir: impl AsRef<Path>, prefix: &str) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), prefix = prefix, "opened local storage");
        Ok(Self {
            dir,
            prefix: prefix.to_string(),
        })
    }

    /// Build a namespaced path: "{dir}/{prefix}.{key}"
    fn path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", self.prefix, key)))
    }
}

impl LocalStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the target so readers
    /// never see a half-written value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path(key)?;
        let tmp = self.dir.join(format!("{}.{}.tmp", self.prefix, key));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        debug!(key = key, bytes = value.len(), "stored local value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local storage for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn scratch_dir() -> PathBuf {
        let n = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("wealth-ocean-storage-{}-{}", std::process::id(), n))
    }

    #[test]
    fn test_file_storage_set_get_remove() {
        let dir = scratch_dir();
        let storage = FileStorage::open(&dir, "test").unwrap();

        assert_eq!(storage.get("auth_token").unwrap(), None);
        storage.set("auth_token", "abc").unwrap();
        assert_eq!(storage.get("auth_token").unwrap().as_deref(), Some("abc"));
        assert!(dir.join("test.auth_token").exists());

        storage.set("auth_token", "def").unwrap();
        assert_eq!(storage.get("auth_token").unwrap().as_deref(), Some("def"));

        storage.remove("auth_token").unwrap();
        storage.remove("auth_token").unwrap();
        assert_eq!(storage.get("auth_token").unwrap(), None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_storage_prefixes_isolate() {
        let dir = scratch_dir();
        let live = FileStorage::open(&dir, "live").unwrap();
        let paper = FileStorage::open(&dir, "paper").unwrap();

        live.set("current_user", "ravi").unwrap();
        assert_eq!(paper.get("current_user").unwrap(), None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_storage_rejects_path_keys() {
        let dir = scratch_dir();
        let storage = FileStorage::open(&dir, "test").unwrap();
        assert!(matches!(
            storage.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
        storage.remove("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
    }
}
