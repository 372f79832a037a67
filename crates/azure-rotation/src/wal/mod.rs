//! Write-ahead log of rotation intents
//!
//! An intent record is written *before* the externally visible mutation it
//! describes and deleted only once internal state has caught up. A record
//! surviving process restart is the signal to the recovery path; the host
//! drives [`crate::Backend::rollback`] for every surviving record, on start
//! and periodically after that.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::{Result, RotationError};
use crate::storage::{Entry, StorageBackend};

/// Storage prefix under which WAL records live
pub const WAL_PREFIX: &str = "wal/";

/// Kind tag of a WAL record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalKind {
    /// A root-credential rotation is in flight; the record itself is the
    /// signal that a stale staged secret may exist. Empty payload.
    #[serde(rename = "rotateRootCreds")]
    RotateRootCreds,
}

impl WalKind {
    /// Wire name of the kind
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RotateRootCreds => "rotateRootCreds",
        }
    }
}

impl fmt::Display for WalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier of one WAL record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalId(String);

impl WalId {
    fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn path(&self) -> String {
        format!("{WAL_PREFIX}{}", self.0)
    }
}

impl fmt::Display for WalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One durable intent record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// Host-assigned opaque identifier
    pub id: WalId,
    /// Kind tag
    pub kind: WalKind,
    /// Kind-specific payload; empty for `rotateRootCreds`
    #[serde(default)]
    pub payload: Value,
    /// When the record was written
    pub created_at: DateTime<Utc>,
}

/// Durable intent log over host storage
pub struct WalStore {
    storage: Arc<dyn StorageBackend>,
}

impl WalStore {
    /// Build a WAL over the host storage
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Persist an intent record and return its id
    pub async fn put(&self, kind: WalKind, payload: Value) -> Result<WalId> {
        let record = WalRecord {
            id: WalId::fresh(),
            kind,
            payload,
            created_at: Utc::now(),
        };
        let value = serde_json::to_vec(&record)
            .map_err(|err| RotationError::wal(format!("encoding wal record: {err}")))?;
        self.storage
            .put(Entry::new(record.id.path(), value))
            .await
            .map_err(|err| RotationError::wal(err.to_string()))?;
        Ok(record.id)
    }

    /// Remove a record; removing an absent record is not an error
    pub async fn delete(&self, id: &WalId) -> Result<()> {
        self.storage
            .delete(&id.path())
            .await
            .map_err(|err| RotationError::wal(err.to_string()))
    }

    /// All surviving records, for the recovery path
    pub async fn list(&self) -> Result<Vec<WalRecord>> {
        let paths = self
            .storage
            .list(WAL_PREFIX)
            .await
            .map_err(|err| RotationError::wal(err.to_string()))?;

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(entry) = self
                .storage
                .get(&path)
                .await
                .map_err(|err| RotationError::wal(err.to_string()))?
            else {
                continue;
            };
            let record: WalRecord = serde_json::from_slice(&entry.value)
                .map_err(|err| RotationError::wal(format!("decoding wal record: {err}")))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn put_list_delete_round_trip() {
        let storage = Arc::new(MemoryStorage::new());
        let wal = WalStore::new(storage);

        let id = wal.put(WalKind::RotateRootCreds, Value::Null).await.unwrap();
        let records = wal.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].kind, WalKind::RotateRootCreds);
        assert!(records[0].payload.is_null());

        wal.delete(&id).await.unwrap();
        assert!(wal.list().await.unwrap().is_empty());

        // deleting again is not an error
        wal.delete(&id).await.unwrap();
    }

    #[test]
    fn kind_serializes_to_wire_name() {
        let json = serde_json::to_string(&WalKind::RotateRootCreds).unwrap();
        assert_eq!(json, "\"rotateRootCreds\"");
        assert_eq!(WalKind::RotateRootCreds.as_str(), "rotateRootCreds");
    }
}
