//! Durable session persistence
//!
//! `KeyValueStorage` abstracts the host's local key-value medium (browser
//! storage, a directory on disk, an in-memory map for tests).
//! `PersistenceAdapter` maps session keys to JSON-serialized turn sequences
//! on top of it. The adapter never fails outward: write errors are logged,
//! unreadable entries are reported as "no session" and deleted.

use crate::error::{ChatError, Result};
use crate::message_store::sanitize_values;
use crate::types::ChatTurn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Synchronous string key-value storage
pub trait KeyValueStorage: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage for testing and single-process use
#[derive(Default)]
pub struct MemoryStorage {
    entries: std::sync::RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` currently holds a value
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ChatError::Storage(format!("Failed to acquire storage lock: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ChatError::Storage(format!("Failed to acquire storage lock: {}", e)))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ChatError::Storage(format!("Failed to acquire storage lock: {}", e)))?;
        entries.remove(key);
        Ok(())
    }
}

/// Directory-backed storage, one file per key
///
/// Atomic writes via temp file + rename to prevent torn entries.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a file storage rooted at `dir` (created lazily on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a key; non `[A-Za-z0-9_-]` bytes are percent-encoded
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 5);
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{:02X}", byte));
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ChatError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            ChatError::Storage(format!(
                "Failed to create storage directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");

        std::fs::write(&tmp_path, value).map_err(|e| {
            ChatError::Storage(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;

        std::fs::rename(&tmp_path, &path).map_err(|e| {
            ChatError::Storage(format!(
                "Failed to rename {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChatError::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Maps session keys to serialized turn sequences
///
/// Stateless apart from the storage handle; every operation swallows its
/// own failures.
#[derive(Clone)]
pub struct PersistenceAdapter {
    storage: Arc<dyn KeyValueStorage>,
    namespace: String,
}

impl PersistenceAdapter {
    /// Create an adapter writing keys under `namespace`
    pub fn new(storage: Arc<dyn KeyValueStorage>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    /// Key prefix
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Deterministic storage key for a session
    ///
    /// Single-agent: `<ns>_<primary>_<context|none>`.
    /// Group: `<ns>_<primary>_<secondary>_<context|none>`.
    pub fn key_for(&self, primary: &str, context: Option<&str>, secondary: Option<&str>) -> String {
        let context = context.filter(|c| !c.is_empty()).unwrap_or("none");
        match secondary {
            Some(secondary) => format!(
                "{}_{}_{}_{}",
                self.namespace, primary, secondary, context
            ),
            None => format!("{}_{}_{}", self.namespace, primary, context),
        }
    }

    /// Serialize and store the full turn sequence; returns whether it was written
    pub fn save(&self, key: &str, turns: &[ChatTurn]) -> bool {
        let json = match serde_json::to_string(turns) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize session");
                return false;
            }
        };

        match self.storage.set(key, &json) {
            Ok(()) => {
                tracing::debug!(key = %key, count = turns.len(), "Session saved");
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to save session");
                false
            }
        }
    }

    /// Load the turn sequence stored under `key`
    ///
    /// Returns `None` when nothing is stored, the medium fails, or the entry
    /// is corrupt. Corrupt entries are removed. Individually malformed turns
    /// inside a well-formed array are dropped.
    pub fn load(&self, key: &str) -> Option<Vec<ChatTurn>> {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read session");
                return None;
            }
        };

        let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding corrupted session");
                self.clear(key);
                return None;
            }
        };

        let total = values.len();
        let turns = sanitize_values(values);
        tracing::debug!(
            key = %key,
            count = turns.len(),
            dropped = total - turns.len(),
            "Session loaded"
        );
        Some(turns)
    }

    /// Remove the durable entry for `key`; returns whether it succeeded
    pub fn clear(&self, key: &str) -> bool {
        match self.storage.remove(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to clear session");
                false
            }
        }
    }
}
