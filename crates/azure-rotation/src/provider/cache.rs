//! Fingerprint-checked cache of the built provider client
//!
//! The client is expensive to build (token acquisition, connection pool)
//! and read-mostly, so it sits behind a read/write lock. Staleness is
//! detected by comparing the snapshot's authentication fingerprint against
//! the one captured at build time; there is no back-pointer from the config
//! store into this cell.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::{ClientFactory, ProviderClient};
use crate::config::ConfigSnapshot;
use crate::core::Result;

struct CachedClient {
    client: Arc<dyn ProviderClient>,
    fingerprint: [u8; 32],
}

/// Per-mount cell holding the lazily built provider client
#[derive(Default)]
pub struct ClientCell {
    slot: RwLock<Option<CachedClient>>,
}

impl ClientCell {
    /// Create an empty cell
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached client if it matches `snapshot`, else rebuild
    ///
    /// Fast path under the read lock; on mismatch the write lock is taken,
    /// the fingerprint re-checked, and only then is a new client built and
    /// swapped in. Dropping the old client releases its pooled connections.
    pub async fn get_or_refresh(
        &self,
        snapshot: &ConfigSnapshot,
        factory: &dyn ClientFactory,
    ) -> Result<Arc<dyn ProviderClient>> {
        let fingerprint = snapshot.auth_fingerprint();

        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.fingerprint == fingerprint {
                    return Ok(cached.client.clone());
                }
            }
        }

        let mut slot = self.slot.write().await;
        // re-check: another writer may have refreshed while we waited
        if let Some(cached) = slot.as_ref() {
            if cached.fingerprint == fingerprint {
                return Ok(cached.client.clone());
            }
        }

        debug!("building provider client from current configuration");
        let client = factory.build(snapshot)?;
        *slot = Some(CachedClient {
            client: client.clone(),
            fingerprint,
        });
        Ok(client)
    }

    /// Drop the cached client and its fingerprint
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        *slot = None;
    }

    /// Whether a client is currently cached
    pub async fn is_cached(&self) -> bool {
        self.slot.read().await.is_some()
    }
}
