//! Recency index: `(component_id, modified)` records used to pick eviction victims.
//!
//! Records are kept in an ordered map keyed by `(modified, id)`, so the
//! "oldest first" scan is a plain in-order walk. The row `id` is assigned
//! on insert and never changes; it breaks ties between equal timestamps in
//! insertion order.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::IndexError;

/// File name used by [`SortedIndex::open`] inside its directory.
pub const INDEX_FILENAME: &str = "index.json";

/// One row of the recency index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: u64,
    pub component_id: String,
    /// Milliseconds since epoch of the last read hit or write.
    pub modified: i64,
}

/// Secondary index over cache keys ordered by last access.
pub trait RecencyIndex: Send {
    fn find(&self, component_id: &str) -> Result<Option<IndexRecord>, IndexError>;

    /// Insert a new record. Inserting an id that already has a record refreshes it instead.
    fn insert(&mut self, component_id: &str, modified: i64) -> Result<(), IndexError>;

    /// Update the timestamp of an existing record. Returns `false` when no record exists.
    fn update(&mut self, component_id: &str, modified: i64) -> Result<bool, IndexError>;

    /// All indexed ids, least recently modified first.
    fn oldest_first(&self) -> Result<Vec<String>, IndexError>;

    /// Delete the given ids as one batch. Returns how many records were removed.
    fn remove_all(&mut self, component_ids: &[String]) -> Result<usize, IndexError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an access: insert when absent, update when present.
    fn touch(&mut self, component_id: &str, now_ms: i64) -> Result<(), IndexError> {
        match self.find(component_id)? {
            None => self.insert(component_id, now_ms),
            Some(_) => {
                // A record removed between find and update is simply re-created
                if !self.update(component_id, now_ms)? {
                    self.insert(component_id, now_ms)?;
                }
                Ok(())
            }
        }
    }
}

/// Ordered in-memory index, optionally mirrored to `<dir>/index.json`.
#[derive(Debug, Default)]
pub struct SortedIndex {
    rows: HashMap<String, IndexRecord>,
    by_recency: BTreeMap<(i64, u64), String>,
    next_id: u64,
    path: Option<PathBuf>,
}

impl SortedIndex {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a persisted index under `dir`. Any failure means the index engine
    /// is unavailable and callers should fall back to running without one.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, IndexError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| {
            IndexError::Unavailable(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(INDEX_FILENAME);

        let records: Vec<IndexRecord> = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| IndexError::Corrupt(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(IndexError::Unavailable(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let mut index = Self {
            path: Some(path),
            ..Self::default()
        };
        for record in records {
            index.next_id = index.next_id.max(record.id + 1);
            index.place(record);
        }
        Ok(index)
    }

    fn place(&mut self, record: IndexRecord) {
        if let Some(old) = self.rows.remove(&record.component_id) {
            self.by_recency.remove(&(old.modified, old.id));
        }
        self.by_recency
            .insert((record.modified, record.id), record.component_id.clone());
        self.rows.insert(record.component_id.clone(), record);
    }

    fn persist(&self) -> Result<(), IndexError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let records: Vec<&IndexRecord> = self.rows.values().collect();
        let body =
            serde_json::to_string(&records).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl RecencyIndex for SortedIndex {
    fn find(&self, component_id: &str) -> Result<Option<IndexRecord>, IndexError> {
        Ok(self.rows.get(component_id).cloned())
    }

    fn insert(&mut self, component_id: &str, modified: i64) -> Result<(), IndexError> {
        let id = match self.rows.get(component_id) {
            Some(existing) => existing.id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        self.place(IndexRecord {
            id,
            component_id: component_id.to_string(),
            modified,
        });
        self.persist()
    }

    fn update(&mut self, component_id: &str, modified: i64) -> Result<bool, IndexError> {
        let Some(existing) = self.rows.get(component_id) else {
            return Ok(false);
        };
        let record = IndexRecord {
            modified,
            ..existing.clone()
        };
        self.place(record);
        self.persist()?;
        Ok(true)
    }

    fn oldest_first(&self) -> Result<Vec<String>, IndexError> {
        Ok(self.by_recency.values().cloned().collect())
    }

    fn remove_all(&mut self, component_ids: &[String]) -> Result<usize, IndexError> {
        let mut removed = 0;
        for component_id in component_ids {
            if let Some(old) = self.rows.remove(component_id) {
                self.by_recency.remove(&(old.modified, old.id));
                removed += 1;
            }
        }
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}
