//! In-memory storage backend

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Entry, StorageBackend};
use crate::core::StorageError;

/// In-memory implementation of [`StorageBackend`]
///
/// Used by tests and by hosts that keep mount state elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, path: &str) -> Result<Option<Entry>, StorageError> {
        Ok(self
            .entries
            .get(path)
            .map(|value| Entry::new(path, value.clone())))
    }

    async fn put(&self, entry: Entry) -> Result<(), StorageError> {
        self.entries.insert(entry.path, entry.value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.entries.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut paths: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        paths.sort();
        Ok(paths)
    }
}
