//! Key/value storage media backing cart persistence.
//!
//! The engine asks very little of a medium: string keys, string values,
//! `get`/`set`/`remove`. Two lifetimes exist - an ephemeral session-scoped
//! medium and a reload-surviving durable one - and both are modeled by the
//! same [`KeyValueStore`] trait so the persistence layer can treat them
//! uniformly and tests can substitute in-memory stores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

/// Errors raised while setting up a storage medium.
///
/// Runtime reads and writes never raise: a failed read is an absent value
/// and a failed write is logged and dropped, per the engine's
/// availability-over-consistency contract.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing directory could not be created.
    #[error("failed to create storage directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A string key/value medium.
///
/// Implementations must tolerate concurrent use from multiple engine
/// components and must never panic on I/O trouble.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Absent and unreadable are the same thing.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value. Failures are logged by the implementation and dropped.
    fn set(&self, key: &str, value: String);

    /// Remove a value. Removing an absent key is a no-op.
    fn remove(&self, key: &str);
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-memory store.
///
/// Serves as the session-scoped medium (its contents live exactly as long
/// as the process/tab does) and as the medium of choice in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .map(|entries| entries.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// Durable store keeping one file per key under a directory.
///
/// This is the reload-surviving medium. All I/O failures degrade: reads
/// report absence, writes and removes log a warning and carry on.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CreateDir`] if the directory cannot be
    /// created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are dotted identifiers; anything else is flattened so a key
        // can never escape the storage directory.
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }

    /// The directory this store writes under.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: String) {
        let path = self.path_for(key);
        if let Err(e) = std::fs::write(&path, value) {
            warn!(key = %key, path = %path.display(), error = %e, "Failed to write storage entry");
        }
    }

    fn remove(&self, key: &str) {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(key = %key, path = %path.display(), error = %e, "Failed to remove storage entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("cart"), None);

        store.set("cart", "{}".to_string());
        assert_eq!(store.get("cart"), Some("{}".to_string()));

        store.remove("cart");
        assert_eq!(store.get("cart"), None);
    }

    #[test]
    fn test_memory_store_remove_absent_is_noop() {
        let store = MemoryStore::new();
        store.remove("never-set");
        assert_eq!(store.get("never-set"), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).expect("open");

        store.set("meridian.cart", "{\"items\":[]}".to_string());
        assert_eq!(store.get("meridian.cart"), Some("{\"items\":[]}".to_string()));

        store.remove("meridian.cart");
        assert_eq!(store.get("meridian.cart"), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FileStore::open(dir.path()).expect("open");
            store.set("meridian.cart", "persisted".to_string());
        }
        let reopened = FileStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.get("meridian.cart"), Some("persisted".to_string()));
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).expect("open");

        store.set("../escape", "nope".to_string());
        // The value is stored under a flattened name inside the directory.
        assert_eq!(store.get("../escape"), Some("nope".to_string()));
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|e| e.expect("entry").path())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries.iter().all(|p| p.starts_with(dir.path())));
    }
}
