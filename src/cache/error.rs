//! Error types for the key/value store and the recency index.

/// Errors raised by a [`KvStore`](super::store::KvStore) backend.
#[derive(Debug)]
pub enum StoreError {
    /// The write would push the store past its byte quota.
    QuotaExceeded { needed: usize, capacity: usize },
    Io(String),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::QuotaExceeded { needed, capacity } => {
                write!(f, "quota exceeded: {} of {} bytes", needed, capacity)
            }
            StoreError::Io(e) => write!(f, "store io error: {}", e),
            StoreError::Corrupt(e) => write!(f, "store data corrupt: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Errors raised by a [`RecencyIndex`](super::index::RecencyIndex) backend.
#[derive(Debug)]
pub enum IndexError {
    /// The index engine could not be opened on this platform.
    Unavailable(String),
    Io(String),
    Corrupt(String),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Unavailable(e) => write!(f, "recency index unavailable: {}", e),
            IndexError::Io(e) => write!(f, "index io error: {}", e),
            IndexError::Corrupt(e) => write!(f, "index data corrupt: {}", e),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Io(e.to_string())
    }
}
