//! Storage backend with failure injection

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::StorageError;
use crate::storage::{Entry, StorageBackend};

/// In-memory storage with fail-next switches and operation counters
#[derive(Default)]
pub struct MockStorage {
    entries: DashMap<String, Vec<u8>>,
    fail_next_get: AtomicBool,
    fail_next_put: AtomicBool,
    fail_next_delete: AtomicBool,
    put_count: AtomicU32,
}

impl MockStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `get` fail
    pub fn fail_next_get(&self) {
        self.fail_next_get.store(true, Ordering::SeqCst);
    }

    /// Make the next `put` fail
    pub fn fail_next_put(&self) {
        self.fail_next_put.store(true, Ordering::SeqCst);
    }

    /// Make the next `delete` fail
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    /// Number of `put` calls so far, including failed ones
    pub fn put_count(&self) -> u32 {
        self.put_count.load(Ordering::SeqCst)
    }

    /// Raw value at `path`, bypassing the trait
    pub fn raw(&self, path: &str) -> Option<Vec<u8>> {
        self.entries.get(path).map(|value| value.clone())
    }
}

#[async_trait]
impl StorageBackend for MockStorage {
    async fn get(&self, path: &str) -> Result<Option<Entry>, StorageError> {
        if self.fail_next_get.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend {
                path: path.to_string(),
                message: "scripted get failure".into(),
            });
        }
        Ok(self
            .entries
            .get(path)
            .map(|value| Entry::new(path, value.clone())))
    }

    async fn put(&self, entry: Entry) -> Result<(), StorageError> {
        self.put_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_put.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend {
                path: entry.path,
                message: "scripted put failure".into(),
            });
        }
        self.entries.insert(entry.path, entry.value);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend {
                path: path.to_string(),
                message: "scripted delete failure".into(),
            });
        }
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
