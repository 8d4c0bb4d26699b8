//! Bounded key/value cache with a recency index used for eviction.
//!
//! Values are stored as JSON strings in a size-limited [`KvStore`]. Every read
//! hit and every successful write refreshes the key's record in the
//! [`RecencyIndex`]. When a write fails because the store is full, the oldest
//! half of the indexed keys is evicted; without an index the whole store is
//! cleared. The failed write is not retried.
//!
//! No operation here returns an error to the caller: failures are logged and
//! turned into `None` (reads) or a no-op (writes).

pub mod error;
pub mod index;
pub mod store;

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

pub use error::{IndexError, StoreError};
pub use index::{IndexRecord, RecencyIndex, SortedIndex};
pub use store::{FileStore, KvStore, MemoryStore, DEFAULT_CAPACITY_BYTES};

pub struct Cache {
    store: Box<dyn KvStore>,
    index: Option<Box<dyn RecencyIndex>>,
    clock: Arc<dyn Clock>,
}

impl Cache {
    /// Build a cache over `store`. Passing `None` for the index selects the
    /// coarse eviction policy (clear everything).
    pub fn new(store: Box<dyn KvStore>, index: Option<Box<dyn RecencyIndex>>) -> Self {
        if index.is_none() {
            warn!("recency index unavailable, eviction will clear the entire store");
        }
        Self::assemble(store, index)
    }

    fn assemble(store: Box<dyn KvStore>, index: Option<Box<dyn RecencyIndex>>) -> Self {
        let mut cache = Self {
            store,
            index,
            clock: Arc::new(SystemClock),
        };
        cache.index_untracked_keys();
        cache
    }

    /// In-memory store and index.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(
            Box::new(MemoryStore::with_capacity(capacity)),
            Some(Box::new(SortedIndex::in_memory())),
        )
    }

    /// File-backed store and index under `dir`. An index that cannot be opened
    /// degrades the cache to running without one; a store that cannot be
    /// opened is an error.
    pub fn open(dir: impl AsRef<Path>, capacity: usize) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let store = FileStore::open(dir, capacity)?;
        let index: Option<Box<dyn RecencyIndex>> = match SortedIndex::open(dir) {
            Ok(index) => Some(Box::new(index)),
            Err(e) => {
                warn!(
                    dir = %dir.display(),
                    error = %e,
                    "failed to open recency index, eviction will clear the entire store"
                );
                None
            }
        };
        Ok(Self::assemble(Box::new(store), index))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Number of entries in the underlying store.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Number of records in the recency index, if there is one.
    pub fn indexed(&self) -> Option<usize> {
        self.index.as_ref().map(|index| index.len())
    }

    /// Read and deserialize `key`. Returns `None` when absent or unreadable.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read from cache store");
                return None;
            }
        };

        let value = match serde_json::from_str::<T>(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "cached value is not valid JSON");
                return None;
            }
        };

        if let Err(e) = self.record_access(key) {
            warn!(key = %key, error = %e, "unable to update recency index for cache hit");
        }
        Some(value)
    }

    pub fn get_value(&mut self, key: &str) -> Option<Value> {
        self.get::<Value>(key)
    }

    /// Serialize and store `value` under `key`. If the store is full the
    /// oldest half of the cache is evicted and the write is dropped.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialize cache value");
                return;
            }
        };

        match self.store.set(key, serialized) {
            Ok(()) => {
                if let Err(e) = self.record_access(key) {
                    warn!(key = %key, error = %e, "unable to update recency index for cache write");
                }
            }
            Err(e @ StoreError::QuotaExceeded { .. }) => {
                warn!(
                    key = %key,
                    error = %e,
                    "cache store is full, evicting the least recently used half"
                );
                self.evict();
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to write to cache store");
            }
        }
    }

    pub fn set_value(&mut self, key: &str, value: &Value) {
        self.set(key, value);
    }

    /// Drop `key` from both the store and the index.
    pub fn remove(&mut self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key = %key, error = %e, "failed to remove cache entry");
        }
        if let Some(index) = self.index.as_mut() {
            if let Err(e) = index.remove_all(&[key.to_string()]) {
                warn!(key = %key, error = %e, "failed to remove recency record");
            }
        }
    }

    /// Evict the oldest `floor(n/2)` indexed entries, or the whole store when
    /// there is no usable index. Returns the number of entries evicted.
    pub fn evict(&mut self) -> usize {
        let ordered = match &self.index {
            None => None,
            Some(index) => match index.oldest_first() {
                Ok(ids) => Some(ids),
                Err(e) => {
                    warn!(error = %e, "recency index query failed, falling back to full clear");
                    None
                }
            },
        };
        let Some(mut victims) = ordered else {
            return self.clear_store();
        };

        // Victims are fixed before any delete is issued
        victims.truncate(victims.len() / 2);

        for id in &victims {
            if let Err(e) = self.store.remove(id) {
                warn!(key = %id, error = %e, "failed to evict cache entry");
            }
        }
        if let Some(index) = self.index.as_mut() {
            if let Err(e) = index.remove_all(&victims) {
                warn!(error = %e, "failed to delete evicted recency records");
            }
        }

        info!(
            evicted = victims.len(),
            remaining = self.store.len(),
            "evicted least recently used cache entries"
        );
        victims.len()
    }

    fn clear_store(&mut self) -> usize {
        let count = self.store.len();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear cache store");
            return 0;
        }
        info!(evicted = count, "cleared entire cache store");
        count
    }

    /// Give stored keys without a recency record the oldest possible
    /// timestamp, so entries written while the index was unavailable are
    /// still eviction candidates.
    fn index_untracked_keys(&mut self) {
        let Some(index) = self.index.as_mut() else {
            return;
        };
        let mut added = 0;
        for key in self.store.keys() {
            let result = match index.find(&key) {
                Ok(Some(_)) => continue,
                Ok(None) => index.insert(&key, 0),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(key = %key, error = %e, "unable to index existing cache entry");
                return;
            }
            added += 1;
        }
        if added > 0 {
            info!(added, "indexed cache entries that had no recency record");
        }
    }

    fn record_access(&mut self, key: &str) -> Result<(), IndexError> {
        let Some(index) = self.index.as_mut() else {
            return Ok(());
        };
        let now = self.clock.now_ms();
        debug!(key = %key, modified = now, "recording cache access");
        index.touch(key, now)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.store.len())
            .field("indexed", &self.indexed())
            .finish()
    }
}
