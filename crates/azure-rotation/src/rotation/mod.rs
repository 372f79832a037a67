//! Root-credential rotation
//!
//! `rotate_root` is the only code path that mutates the authenticating
//! credential. The ordering is deliberate, provider first:
//!
//! 1. create the new password on the provider; a failure here aborts with
//!    nothing to undo;
//! 2. write a WAL record, after which a crash is recoverable;
//! 3. stage the new secret in config next to the still-active one;
//! 4. invalidate the client cache and set the pending flag;
//! 5. delete the WAL record.
//!
//! A crash between 3 and 5 leaves the WAL record in place; recovery then
//! clears the staged fields, deliberately treating a partially applied
//! rotation as failed, so the caller simply retries. A crash after 5 leaves
//! staged fields without a WAL record; the next operation that needs a
//! client sees them and promotes. In both cases any provider-side password
//! that ends up unused is allowed to expire on its own; at recovery time we
//! cannot tell a usable staged secret from a stale one, and revoking a
//! working credential would be worse than letting a dead one age out.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::Backend;
use crate::config::ConfigSnapshot;
use crate::core::{OperationContext, Result, RotationError};
use crate::wal::WalKind;

/// Outcome of a successful `rotate_root`
///
/// The new secret is never part of the response. Non-fatal cleanup errors
/// ride along as warnings.
#[derive(Debug, Default)]
pub struct RotationOutcome {
    /// Non-fatal cleanup failures encountered along the way
    pub warnings: Vec<String>,
}

impl Backend {
    /// Rotate the root credential
    ///
    /// Privileged operation; the host forwards it to the active replica, so
    /// within one mount rotations arrive serialised. An in-process mutex
    /// additionally serialises rotation against promotion. If a previous
    /// rotation left a staged secret, it is promoted first, then the new
    /// rotation proceeds against the promoted credential.
    pub async fn rotate_root(&self, ctx: &OperationContext) -> Result<RotationOutcome> {
        let _guard = self.rotate_lock.lock().await;
        ctx.ensure_active()?;

        let mut snapshot = self
            .config
            .read()
            .await?
            .ok_or_else(|| RotationError::validation("config not found"))?;
        if snapshot.tenant_id.is_empty() || snapshot.client_id.is_empty() {
            return Err(RotationError::validation(
                "tenant_id and client_id must be configured before rotation",
            ));
        }

        let mut outcome = RotationOutcome::default();

        if self.password_update_pending.load(std::sync::atomic::Ordering::Acquire)
            || snapshot.has_staged_secret()
        {
            let (promoted, warnings) = self.promote_staged(ctx, snapshot).await?;
            snapshot = promoted;
            outcome.warnings.extend(warnings);
        }

        let ttl = snapshot.effective_root_password_ttl();
        let expiration = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|_| RotationError::validation("root_password_ttl out of range"))?;

        let client = self
            .clients
            .get_or_refresh(&snapshot, self.factory.as_ref())
            .await?;

        // ambiguity here would risk rotating a foreign application
        let app = client.get_application(ctx, &snapshot.client_id).await?;

        // the display name is informational; the key id is the durable
        // identifier
        let display_name = format!("vault-{}", Uuid::new_v4());
        let new_cred = client
            .add_application_password(ctx, &app.object_id, &display_name, expiration)
            .await?;
        info!(
            key_id = %new_cred.key_id,
            end_date = %new_cred.end_date,
            "created replacement password credential"
        );

        // the WAL record is the only crash-safe trace of the new
        // provider-side password; if it cannot be written, take the
        // password back out rather than leak it
        let wal_id = match self.wal.put(WalKind::RotateRootCreds, Value::Null).await {
            Ok(id) => id,
            Err(wal_err) => {
                if let Err(cleanup) = client
                    .remove_application_password(ctx, &app.object_id, &new_cred.key_id)
                    .await
                {
                    return Err(RotationError::WalCleanup {
                        wal: wal_err.to_string(),
                        cleanup: cleanup.to_string(),
                    });
                }
                return Err(wal_err);
            }
        };

        // stage the new secret; the active secret stays untouched until
        // promotion
        snapshot.new_client_secret = new_cred.secret_text.clone();
        snapshot.new_client_secret_key_id = new_cred.key_id.clone();
        snapshot.new_client_secret_created = Some(Utc::now());
        snapshot.new_client_secret_expiration = Some(new_cred.end_date);
        snapshot.root_password_expiration_date = Some(new_cred.end_date);
        self.config.write(&snapshot).await?;
        self.clients.invalidate().await;
        self.password_update_pending
            .store(true, std::sync::atomic::Ordering::Release);

        if let Err(err) = self.wal.delete(&wal_id).await {
            // harmless: the rollback callback only clears staged fields and
            // the caller will retry rotation after recovery runs
            warn!(wal_id = %wal_id, error = %err, "failed to delete rotation wal record");
            outcome
                .warnings
                .push(format!("failed to delete rotation wal record: {err}"));
        }

        Ok(outcome)
    }

    /// Promote the staged credential to active
    ///
    /// Caller must hold `rotate_lock`. Moves the staged secret and key id
    /// into the active fields, persists, invalidates the client cache, and
    /// then removes the previously active provider-side password by its
    /// stored key id. The removal is best-effort; failures come back as
    /// warnings, never as errors.
    pub(crate) async fn promote_staged(
        &self,
        ctx: &OperationContext,
        mut snapshot: ConfigSnapshot,
    ) -> Result<(ConfigSnapshot, Vec<String>)> {
        let mut warnings = Vec::new();

        if !snapshot.has_staged_secret() {
            // a rollback got here first; nothing to move
            self.password_update_pending
                .store(false, std::sync::atomic::Ordering::Release);
            return Ok((snapshot, warnings));
        }

        let old_key_id = std::mem::take(&mut snapshot.client_secret_key_id);
        snapshot.client_secret = std::mem::take(&mut snapshot.new_client_secret);
        snapshot.client_secret_key_id = std::mem::take(&mut snapshot.new_client_secret_key_id);
        snapshot.new_client_secret_created = None;
        snapshot.new_client_secret_expiration = None;

        self.config.write(&snapshot).await?;
        self.clients.invalidate().await;
        self.password_update_pending
            .store(false, std::sync::atomic::Ordering::Release);
        info!(
            key_id = %snapshot.client_secret_key_id,
            "promoted staged credential to active"
        );

        if !old_key_id.is_empty() {
            if let Err(warning) = self.remove_old_password(ctx, &snapshot, &old_key_id).await {
                warn!(key_id = %old_key_id, %warning, "failed to remove previous password credential");
                warnings.push(warning);
            }
        }

        Ok((snapshot, warnings))
    }

    async fn remove_old_password(
        &self,
        ctx: &OperationContext,
        snapshot: &ConfigSnapshot,
        old_key_id: &str,
    ) -> std::result::Result<(), String> {
        let client = self
            .clients
            .get_or_refresh(snapshot, self.factory.as_ref())
            .await
            .map_err(|err| format!("building client to remove key '{old_key_id}': {err}"))?;
        let app = client
            .get_application(ctx, &snapshot.client_id)
            .await
            .map_err(|err| format!("resolving application to remove key '{old_key_id}': {err}"))?;
        client
            .remove_application_password(ctx, &app.object_id, old_key_id)
            .await
            .map_err(|err| format!("removing previous password credential '{old_key_id}': {err}"))
    }

    /// Recovery callback for surviving WAL records
    ///
    /// Driven by the host on process start and periodically afterwards.
    /// Idempotent and convergent: it clears the staged fields and the
    /// pending flag, treating the interrupted rotation as failed. The
    /// provider-side password the staged fields pointed at is allowed to
    /// expire on its own.
    pub async fn rollback(
        &self,
        ctx: &OperationContext,
        kind: WalKind,
        _payload: &Value,
    ) -> Result<()> {
        ctx.ensure_active()?;
        match kind {
            WalKind::RotateRootCreds => self.rollback_rotate_root().await,
        }
    }

    async fn rollback_rotate_root(&self) -> Result<()> {
        let _guard = self.rotate_lock.lock().await;

        let Some(mut snapshot) = self.config.read().await? else {
            self.password_update_pending
                .store(false, std::sync::atomic::Ordering::Release);
            return Ok(());
        };

        if snapshot.has_staged_secret()
            || snapshot.new_client_secret_created.is_some()
            || snapshot.new_client_secret_expiration.is_some()
        {
            info!("clearing staged credential left by an interrupted rotation");
            snapshot.clear_staged();
            self.config.write(&snapshot).await?;
            self.clients.invalidate().await;
        }

        self.password_update_pending
            .store(false, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}
