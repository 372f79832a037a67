//! Per-mount backend value
//!
//! One [`Backend`] exists per configured mount; the host constructs it on
//! mount and destroys it on teardown. All mutable state (the cached
//! provider client and the "password update pending" flag) lives here, not
//! in process-wide singletons.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{CONFIG_VERSION, ConfigSnapshot, ConfigStore, ConfigView};
use crate::core::{OperationContext, Result, RotationError, SecretString};
use crate::provider::{ClientCell, ClientFactory, ProviderClient};
use crate::storage::StorageBackend;
use crate::wal::WalStore;

/// Partial configuration update applied by `configure`
///
/// Absent fields keep their stored values. Supplying a new `client_secret`
/// clears the stored key id and any staged rotation, since the key id of a
/// hand-configured secret is unknown.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    /// Directory (tenant) id
    pub tenant_id: Option<String>,
    /// Application (client) id
    pub client_id: Option<String>,
    /// Client secret for outbound authentication
    pub client_secret: Option<String>,
    /// Azure cloud environment name
    pub environment: Option<String>,
    /// Resource override for token requests
    pub resource: Option<String>,
    /// Workload identity federation audience
    pub identity_token_audience: Option<String>,
    /// Lifetime of rotated root passwords
    pub root_password_ttl: Option<Duration>,
}

/// Per-mount plugin backend
///
/// The host dispatcher may invoke operations concurrently; rotation and
/// promotion are serialised by an internal async mutex, and the provider
/// client cache sits behind its own read/write lock.
pub struct Backend {
    pub(crate) config: ConfigStore,
    pub(crate) wal: WalStore,
    pub(crate) clients: ClientCell,
    pub(crate) factory: Arc<dyn ClientFactory>,
    /// Signals that a rotation has staged a secret the next client-using
    /// operation must promote. In-memory only; after a restart the staged
    /// fields in the stored config alone drive promotion.
    pub(crate) password_update_pending: AtomicBool,
    pub(crate) rotate_lock: Mutex<()>,
    workload_identity_supported: bool,
}

impl Backend {
    /// Build a backend over the host storage and a client factory
    pub fn new(storage: Arc<dyn StorageBackend>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            config: ConfigStore::new(storage.clone()),
            wal: WalStore::new(storage),
            clients: ClientCell::new(),
            factory,
            password_update_pending: AtomicBool::new(false),
            rotate_lock: Mutex::new(()),
            workload_identity_supported: false,
        }
    }

    /// Declare whether the host supports plugin workload identity
    /// federation; configuring `identity_token_audience` on a host that
    /// does not is a validation error.
    pub fn with_workload_identity_support(mut self, supported: bool) -> Self {
        self.workload_identity_supported = supported;
        self
    }

    /// Apply a partial configuration update
    ///
    /// Validation failures are returned to the caller and leave storage
    /// unchanged. A successful write invalidates the cached provider
    /// client.
    pub async fn configure(&self, ctx: &OperationContext, update: ConfigUpdate) -> Result<()> {
        ctx.ensure_active()?;

        let mut snapshot = self.config.read().await?.unwrap_or(ConfigSnapshot {
            version: CONFIG_VERSION,
            ..ConfigSnapshot::default()
        });

        if let Some(tenant_id) = update.tenant_id {
            snapshot.tenant_id = tenant_id;
        }
        if let Some(client_id) = update.client_id {
            snapshot.client_id = client_id;
        }
        if let Some(secret) = update.client_secret {
            snapshot.client_secret = SecretString::new(secret);
            // the provider-side key id of a hand-configured secret is
            // unknown, and any staged rotation no longer applies
            snapshot.client_secret_key_id.clear();
            snapshot.clear_staged();
        }
        if let Some(environment) = update.environment {
            snapshot.environment = environment;
        }
        if let Some(resource) = update.resource {
            snapshot.resource = resource;
        }
        if let Some(audience) = update.identity_token_audience {
            if !audience.is_empty() && !self.workload_identity_supported {
                return Err(RotationError::validation(
                    "identity_token_audience requires a host with plugin workload identity support",
                ));
            }
            snapshot.identity_token_audience = audience;
        }
        if let Some(ttl) = update.root_password_ttl {
            snapshot.root_password_ttl = ttl;
        }

        self.config.write(&snapshot).await?;
        self.clients.invalidate().await;
        debug!("configuration updated");
        Ok(())
    }

    /// Read the non-sensitive configuration view
    pub async fn read_config(&self, ctx: &OperationContext) -> Result<Option<ConfigView>> {
        ctx.ensure_active()?;
        Ok(self.config.read().await?.map(|snapshot| snapshot.view()))
    }

    /// Remove the stored configuration, e.g. on mount teardown
    pub async fn delete_config(&self, ctx: &OperationContext) -> Result<()> {
        ctx.ensure_active()?;
        self.config.delete().await?;
        self.clients.invalidate().await;
        self.password_update_pending.store(false, Ordering::Release);
        Ok(())
    }

    /// The provider client for the active credential
    ///
    /// This is the promotion trigger: if a rotation has staged a secret,
    /// signalled by the pending flag or by staged fields surviving a
    /// restart, the staged credential is promoted before a client is
    /// handed out, so every operation after a rotation authenticates with
    /// the new secret.
    pub async fn provider_client(
        &self,
        ctx: &OperationContext,
    ) -> Result<Arc<dyn ProviderClient>> {
        ctx.ensure_active()?;
        let mut snapshot = self
            .config
            .read()
            .await?
            .ok_or_else(|| RotationError::validation("config not found"))?;

        if self.password_update_pending.load(Ordering::Acquire) || snapshot.has_staged_secret() {
            let _guard = self.rotate_lock.lock().await;
            // re-read under the lock; a concurrent rotation, promotion, or
            // WAL rollback may have settled the staged state already
            snapshot = self
                .config
                .read()
                .await?
                .ok_or_else(|| RotationError::validation("config not found"))?;
            if self.password_update_pending.load(Ordering::Acquire)
                || snapshot.has_staged_secret()
            {
                let (promoted, warnings) = self.promote_staged(ctx, snapshot).await?;
                snapshot = promoted;
                for warning in warnings {
                    warn!(%warning, "promotion cleanup warning");
                }
            }
        }

        self.clients
            .get_or_refresh(&snapshot, self.factory.as_ref())
            .await
    }
}
