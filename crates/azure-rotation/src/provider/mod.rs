//! Identity-provider capability surface
//!
//! [`ProviderClient`] is the narrow trait the rotation core needs from the
//! identity provider; production code supplies the Microsoft Graph backed
//! [`GraphClient`], tests supply the recording fake from
//! [`crate::testing`]. The cached client cell lives in [`cache`].

mod cache;
mod graph;

pub use cache::ClientCell;
pub use graph::{GraphClient, GraphClientFactory};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::ConfigSnapshot;
use crate::core::{OperationContext, Result, SecretString};

/// Identity-provider failures
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No application matched the configured client id
    #[error("no application found for client id '{client_id}'")]
    ApplicationNotFound {
        /// The client id that matched nothing
        client_id: String,
    },

    /// More than one application matched the configured client id; the
    /// system refuses to guess which one to rotate
    #[error("multiple applications found for client id '{client_id}'")]
    AmbiguousApplication {
        /// The ambiguous client id
        client_id: String,
    },

    /// Token acquisition against the provider failed
    #[error("authentication against the identity provider failed: {reason}")]
    Auth {
        /// Failure description
        reason: String,
    },

    /// Transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// The provider returned a non-success response
    #[error("provider returned HTTP {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Sanitized response body
        body: String,
    },

    /// The operation's cancellation context fired mid-call
    #[error("provider call cancelled")]
    Cancelled,
}

/// An application object on the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    /// Provider-side object id, used to address password operations
    pub object_id: String,
    /// The application (client) id
    pub app_id: String,
}

/// A password credential created on an application
#[derive(Debug, Clone)]
pub struct PasswordCredential {
    /// Provider-assigned durable identifier of this credential
    pub key_id: String,
    /// The secret itself; returned only at creation time
    pub secret_text: SecretString,
    /// When the credential expires on the provider
    pub end_date: DateTime<Utc>,
}

/// Narrow, authenticated capability surface over the identity provider
///
/// All operations may block on I/O and honor the cancellation context.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Resolve the single application matching `client_id`
    ///
    /// Fails with [`ProviderError::ApplicationNotFound`] on zero matches
    /// and [`ProviderError::AmbiguousApplication`] on more than one.
    async fn get_application(
        &self,
        ctx: &OperationContext,
        client_id: &str,
    ) -> std::result::Result<Application, ProviderError>;

    /// Create a new password credential on the application
    async fn add_application_password(
        &self,
        ctx: &OperationContext,
        object_id: &str,
        display_name: &str,
        expiration: DateTime<Utc>,
    ) -> std::result::Result<PasswordCredential, ProviderError>;

    /// Remove a password credential by key id
    ///
    /// Idempotent: removing a key already absent on the provider is not an
    /// error.
    async fn remove_application_password(
        &self,
        ctx: &OperationContext,
        object_id: &str,
        key_id: &str,
    ) -> std::result::Result<(), ProviderError>;
}

/// Builds a [`ProviderClient`] from a configuration snapshot
///
/// Production code uses [`GraphClientFactory`]; tests supply a factory
/// returning a shared fake regardless of the snapshot.
pub trait ClientFactory: Send + Sync {
    /// Build a client authenticated as described by `snapshot`
    fn build(&self, snapshot: &ConfigSnapshot) -> Result<Arc<dyn ProviderClient>>;
}
