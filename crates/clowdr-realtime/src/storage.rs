//! Key/value storage for view state that survives a restart
//!
//! Mirrors browser local storage: string keys, string values, synchronous
//! access. [`MemoryStorage`] backs tests; [`FileStorage`] keeps one JSON
//! document on disk and rewrites it atomically (temp file + rename).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::RealtimeResult;

/// String key/value persistence
pub trait LocalStorage: Send + Sync {
    /// Read a value
    fn get_item(&self, key: &str) -> RealtimeResult<Option<String>>;

    /// Write a value, replacing any previous one
    fn set_item(&self, key: &str, value: &str) -> RealtimeResult<()>;

    /// Remove a value
    fn remove_item(&self, key: &str) -> RealtimeResult<()>;
}

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> RealtimeResult<Option<String>> {
        Ok(self.items.get(key).map(|v| v.value().clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> RealtimeResult<()> {
        trace!(key, "Storing item in memory");
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> RealtimeResult<()> {
        self.items.remove(key);
        Ok(())
    }
}

/// Storage persisted as a single JSON object on disk
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file at `path`
    pub fn open(path: impl AsRef<Path>) -> RealtimeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let items = match std::fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            Ok(_) => BTreeMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Opened local storage");
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> RealtimeResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, serde_json::to_vec_pretty(items)?)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> RealtimeResult<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> RealtimeResult<()> {
        let mut items = self.items.lock();
        items.insert(key.to_string(), value.to_string());
        self.flush(&items)
    }

    fn remove_item(&self, key: &str) -> RealtimeResult<()> {
        let mut items = self.items.lock();
        if items.remove(key).is_some() {
            self.flush(&items)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("k").unwrap(), None);
        assert_ok!(storage.set_item("k", "v"));
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));
        assert_ok!(storage.remove_item("k"));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.json");

        {
            let storage = FileStorage::open(&path).unwrap();
            storage.set_item("RightSideBar_CurrentTab", "3").unwrap();
        }

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(
            storage.get_item("RightSideBar_CurrentTab").unwrap().as_deref(),
            Some("3")
        );
    }

    #[test]
    fn test_file_storage_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        std::fs::write(&path, b"not json").unwrap();
        assert_err!(FileStorage::open(&path));
    }
}
