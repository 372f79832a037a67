//! Typed access to the stored configuration

use std::sync::Arc;

use tracing::{debug, info};

use super::snapshot::{CONFIG_VERSION, ConfigSnapshot};
use crate::core::{Result, StorageError};
use crate::storage::{Entry, StorageBackend};

/// Canonical storage path of the singleton configuration
pub const CONFIG_PATH: &str = "config";

/// The sole path through which persisted configuration is read or written
///
/// Enforces schema versioning on read and the snapshot validation rules on
/// write. Client-cache invalidation after a successful write is owned by
/// the backend, which holds the cache; the store itself has no back-pointer
/// to it.
pub struct ConfigStore {
    storage: Arc<dyn StorageBackend>,
}

impl ConfigStore {
    /// Build a store over the host storage
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Read the singleton configuration
    ///
    /// Returns `None` when no configuration has been written. A record at
    /// an older schema version is rewritten at the current version before
    /// being returned; a failure to re-persist the upgraded record is an
    /// error, never "no config".
    pub async fn read(&self) -> Result<Option<ConfigSnapshot>> {
        let Some(entry) = self.storage.get(CONFIG_PATH).await? else {
            return Ok(None);
        };

        let mut snapshot: ConfigSnapshot =
            serde_json::from_slice(&entry.value).map_err(|err| StorageError::Corrupt {
                path: CONFIG_PATH.to_string(),
                message: err.to_string(),
            })?;

        if snapshot.needs_upgrade() {
            info!(
                from = snapshot.version,
                to = CONFIG_VERSION,
                "upgrading stored configuration schema"
            );
            snapshot.version = CONFIG_VERSION;
            self.persist(&snapshot).await?;
        }

        Ok(Some(snapshot))
    }

    /// Validate and persist the configuration
    pub async fn write(&self, snapshot: &ConfigSnapshot) -> Result<()> {
        snapshot.validate()?;
        self.persist(snapshot).await?;
        debug!("configuration persisted");
        Ok(())
    }

    /// Remove the stored configuration
    pub async fn delete(&self) -> Result<()> {
        self.storage.delete(CONFIG_PATH).await?;
        Ok(())
    }

    async fn persist(&self, snapshot: &ConfigSnapshot) -> Result<()> {
        let value = serde_json::to_vec(snapshot).map_err(|err| StorageError::Corrupt {
            path: CONFIG_PATH.to_string(),
            message: err.to_string(),
        })?;
        self.storage.put(Entry::new(CONFIG_PATH, value)).await?;
        Ok(())
    }
}
