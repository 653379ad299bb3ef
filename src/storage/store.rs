// Key-value persistence - the primitive the value store writes through
//
// Provides string-keyed, string-valued storage:
// - KvStore: the trait every backend implements
// - SledStore: crash-safe on-disk backend using sled

use std::path::Path;
use thiserror::Error;

/// Errors from storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Stored value is not valid UTF-8")]
    InvalidUtf8,

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// A persistent string key-value store.
///
/// Any method may fail (disk errors, quota); callers decide whether a failure
/// is fatal.
pub trait KvStore: Send + Sync {
    /// Read the raw string stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key` if present
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Size figures for a sled database
#[derive(Clone, Debug)]
pub struct StorageStats {
    /// Keys currently stored
    pub key_count: usize,
    /// Bytes sled reports on disk
    pub disk_size_bytes: u64,
}

/// sled-backed [`KvStore`]; writes are durable once flushed
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open the database directory, creating it if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Block until pending writes hit disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            key_count: self.db.len(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => {
                let value = String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::InvalidUtf8)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }
}
