//! Host storage facade
//!
//! The plugin host supplies the durable key/value store; everything in this
//! crate goes through the [`StorageBackend`] trait so tests can run against
//! the in-memory implementation.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;

use crate::core::StorageError;

/// One stored entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Storage path of the entry
    pub path: String,
    /// Opaque serialized value
    pub value: Vec<u8>,
}

impl Entry {
    /// Build an entry from a path and serialized value
    pub fn new(path: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Durable key/value storage provided by the plugin host
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the entry at `path`, if any
    async fn get(&self, path: &str) -> Result<Option<Entry>, StorageError>;

    /// Persist an entry, replacing any previous value at its path
    async fn put(&self, entry: Entry) -> Result<(), StorageError>;

    /// Remove the entry at `path`; removing an absent entry is not an error
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// List paths under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
