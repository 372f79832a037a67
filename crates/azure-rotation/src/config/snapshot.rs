//! The persisted configuration record

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{
    DEFAULT_ROOT_PASSWORD_TTL, Result, RotationError, SecretString, time::seconds,
};

/// Current schema version of the stored snapshot
///
/// Version 0 records carry the historical `azure_*` field names; they are
/// upgraded in place on read.
pub const CONFIG_VERSION: u32 = 1;

/// Singleton plugin configuration for one mount
///
/// The staged `new_client_secret*` fields are populated only between
/// rotation-begin and promotion; they are empty otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Directory (tenant) id of the service principal
    #[serde(default, alias = "azure_tenant_id")]
    pub tenant_id: String,

    /// Application (client) id of the service principal
    #[serde(default, alias = "azure_client_id")]
    pub client_id: String,

    /// The currently active secret used for outbound authentication
    #[serde(default, alias = "azure_client_secret")]
    pub client_secret: SecretString,

    /// Provider-side key id of the active secret
    #[serde(default)]
    pub client_secret_key_id: String,

    /// Staged replacement secret, populated only mid-rotation
    #[serde(default)]
    pub new_client_secret: SecretString,

    /// Provider-side key id of the staged secret
    #[serde(default)]
    pub new_client_secret_key_id: String,

    /// When the staged secret was created
    #[serde(default)]
    pub new_client_secret_created: Option<DateTime<Utc>>,

    /// When the staged secret expires on the provider
    #[serde(default)]
    pub new_client_secret_expiration: Option<DateTime<Utc>>,

    /// Lifetime of rotated root passwords; zero means the documented
    /// default of 4,380 hours
    #[serde(default, with = "seconds")]
    pub root_password_ttl: Duration,

    /// Expiration of the most recently rotated root password
    #[serde(default)]
    pub root_password_expiration_date: Option<DateTime<Utc>>,

    /// Azure cloud environment name; empty selects the public cloud
    #[serde(default)]
    pub environment: String,

    /// Resource override for token requests
    #[serde(default)]
    pub resource: String,

    /// Audience for plugin workload identity federation; mutually
    /// exclusive with `client_secret`
    #[serde(default)]
    pub identity_token_audience: String,

    /// Schema version tag; absent in historical records, which read as 0
    #[serde(default)]
    pub version: u32,
}

impl ConfigSnapshot {
    /// Validate the snapshot before it is persisted
    ///
    /// Missing required identifiers and the secret/federation mutual
    /// exclusion are caller errors, not storage errors.
    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.is_empty() {
            return Err(RotationError::validation("tenant_id must be set"));
        }
        if self.client_id.is_empty() {
            return Err(RotationError::validation("client_id must be set"));
        }
        if !self.client_secret.is_empty() && !self.identity_token_audience.is_empty() {
            return Err(RotationError::validation(
                "client_secret and identity_token_audience are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Whether this record predates the current schema version
    pub fn needs_upgrade(&self) -> bool {
        self.version < CONFIG_VERSION
    }

    /// The configured TTL, substituting the default when zero
    pub fn effective_root_password_ttl(&self) -> Duration {
        if self.root_password_ttl.is_zero() {
            DEFAULT_ROOT_PASSWORD_TTL
        } else {
            self.root_password_ttl
        }
    }

    /// Whether a rotation has staged a replacement secret
    pub fn has_staged_secret(&self) -> bool {
        !self.new_client_secret.is_empty() || !self.new_client_secret_key_id.is_empty()
    }

    /// Clear all staged-rotation fields
    pub fn clear_staged(&mut self) {
        self.new_client_secret = SecretString::default();
        self.new_client_secret_key_id.clear();
        self.new_client_secret_created = None;
        self.new_client_secret_expiration = None;
    }

    /// SHA-256 over the authentication-relevant subset of the snapshot
    ///
    /// The cached provider client stores this fingerprint; a mismatch means
    /// the client was built from an older snapshot and must be rebuilt.
    pub fn auth_fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for field in [
            self.tenant_id.as_str(),
            self.client_id.as_str(),
            self.environment.as_str(),
            self.resource.as_str(),
            self.identity_token_audience.as_str(),
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        self.client_secret.expose(|secret| {
            hasher.update(secret.as_bytes());
        });
        hasher.finalize().into()
    }

    /// The non-sensitive view returned by config reads
    pub fn view(&self) -> ConfigView {
        ConfigView {
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            environment: self.environment.clone(),
            resource: self.resource.clone(),
            identity_token_audience: self.identity_token_audience.clone(),
            root_password_ttl: self.root_password_ttl,
            root_password_expiration_date: self.root_password_expiration_date,
        }
    }
}

/// Non-sensitive projection of [`ConfigSnapshot`]
///
/// Secrets and key ids never appear here; this is the shape config reads
/// return to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigView {
    /// Directory (tenant) id
    pub tenant_id: String,
    /// Application (client) id
    pub client_id: String,
    /// Azure cloud environment name
    pub environment: String,
    /// Resource override for token requests
    pub resource: String,
    /// Workload identity federation audience
    pub identity_token_audience: String,
    /// Configured root password TTL
    #[serde(with = "seconds")]
    pub root_password_ttl: Duration,
    /// Expiration of the most recently rotated root password, if any
    pub root_password_expiration_date: Option<DateTime<Utc>>,
}
