//! Size-bounded key/value stores holding serialized cache values.
//!
//! Sizes are accounted as `key.len() + value.len()` bytes per entry. A write
//! that would exceed the capacity fails with [`StoreError::QuotaExceeded`] and
//! leaves the store unchanged, which is what drives eviction in the cache.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::StoreError;

/// Default quota, matching the usual browser local storage limit.
pub const DEFAULT_CAPACITY_BYTES: usize = 5 * 1024 * 1024;

/// File name used by [`FileStore`] inside its directory.
pub const STORE_FILENAME: &str = "store.json";

/// Backend holding `key -> serialized value`.
pub trait KvStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;

    /// Removing an absent key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;

    fn clear(&mut self) -> Result<(), StoreError>;

    fn len(&self) -> usize;

    /// Every stored key, sorted.
    fn keys(&self) -> Vec<String>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store with a byte quota.
#[derive(Debug)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    capacity: usize,
    used: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }
}

impl MemoryStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently accounted against the quota.
    pub fn used(&self) -> usize {
        self.used
    }

    fn entry_size(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }

    fn snapshot(&self) -> &HashMap<String, String> {
        &self.entries
    }

    fn from_entries(entries: HashMap<String, String>, capacity: usize) -> Self {
        let used = entries
            .iter()
            .map(|(k, v)| Self::entry_size(k, v))
            .sum();
        Self {
            entries,
            capacity,
            used,
        }
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let previous = self
            .entries
            .get(key)
            .map(|old| Self::entry_size(key, old))
            .unwrap_or(0);
        let needed = self.used - previous + Self::entry_size(key, &value);
        if needed > self.capacity {
            return Err(StoreError::QuotaExceeded {
                needed,
                capacity: self.capacity,
            });
        }
        self.entries.insert(key.to_string(), value);
        self.used = needed;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if let Some(old) = self.entries.remove(key) {
            self.used -= Self::entry_size(key, &old);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        self.used = 0;
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Store persisted as a single JSON object in `<dir>/store.json`.
///
/// Every mutation rewrites the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new contents on disk. A failed
/// write rolls the in-memory state back.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: impl AsRef<Path>, capacity: usize) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILENAME);

        let entries = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<HashMap<String, String>>(&content)
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            inner: MemoryStore::from_entries(entries, capacity),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let body = serde_json::to_string(self.inner.snapshot())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn restore(&mut self, key: &str, previous: Option<String>) {
        let _ = self.inner.remove(key);
        if let Some(old) = previous {
            let _ = self.inner.set(key, old);
        }
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let previous = self.inner.get(key)?;
        self.inner.set(key, value)?;
        if let Err(e) = self.persist() {
            self.restore(key, previous);
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let previous = self.inner.get(key)?;
        if previous.is_none() {
            return Ok(());
        }
        self.inner.remove(key)?;
        if let Err(e) = self.persist() {
            self.restore(key, previous);
            return Err(e);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let previous = self.inner.snapshot().clone();
        self.inner.clear()?;
        if let Err(e) = self.persist() {
            self.inner = MemoryStore::from_entries(previous, self.inner.capacity());
            return Err(e);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}
