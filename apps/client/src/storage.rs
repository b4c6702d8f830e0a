//! Durable key/value storage for drafts and local collections.
//!
//! `FileStore` keeps one JSON document per key and survives restarts.
//! `MemoryStore` is process-local and can enforce a byte quota.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Quota exceeded: {requested} bytes requested, quota is {quota} bytes")]
    QuotaExceeded { requested: usize, quota: usize },

    #[error("Corrupted value under key '{key}': {source}")]
    Corrupted {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Reads and deserializes a JSON value. A value that fails to parse is `Corrupted`.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupted {
                key: key.to_string(),
                source,
            }),
    }
}

pub fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

// ────────────────────────────────────────────────────────────────────────────
// FileStore
// ────────────────────────────────────────────────────────────────────────────

/// One `<key>.json` file per key under `root`. Writes go through a temp file in
/// the same directory and are renamed into place, so readers never see a
/// partially written document.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        debug!("File store opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes that would push total key + value bytes above `quota`.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// Copy of every stored key/value pair.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let requested = others + key.len() + value.len();
            if requested > quota {
                return Err(StorageError::QuotaExceeded { requested, quota });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.get("draft_account").unwrap(), None);
        store.set("draft_account", "[1,2,3]").unwrap();
        assert_eq!(store.get("draft_account").unwrap().as_deref(), Some("[1,2,3]"));

        store.set("draft_account", "[]").unwrap();
        assert_eq!(store.get("draft_account").unwrap().as_deref(), Some("[]"));

        store.remove("draft_account").unwrap();
        assert_eq!(store.get("draft_account").unwrap(), None);
        // Removing twice is fine.
        store.remove("draft_account").unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            write_json(&store, "target_accounts", &json!([{"id": "a"}])).unwrap();
        }
        let reopened = FileStore::open(dir.path()).unwrap();
        let value: Option<Value> = read_json(&reopened, "target_accounts").unwrap();
        assert_eq!(value, Some(json!([{"id": "a"}])));
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(store.get(""), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn test_corrupted_value_is_reported() {
        let store = MemoryStore::new();
        store.set("draft_persona", "{not json").unwrap();
        let result: Result<Option<Vec<Value>>, _> = read_json(&store, "draft_persona");
        assert!(matches!(result, Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn test_memory_quota_rejects_oversized_writes() {
        let store = MemoryStore::with_quota(32);
        store.set("k", "small").unwrap();
        let err = store.set("big", &"x".repeat(64)).unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { quota: 32, .. }));
        // Failed write leaves existing data alone.
        assert_eq!(store.snapshot().len(), 1);
        // Overwriting a key only counts the new value.
        store.set("k", &"y".repeat(30)).unwrap();
    }
}
