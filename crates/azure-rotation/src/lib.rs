//! Root-credential rotation core for an Azure secrets plugin.
//!
//! The plugin authenticates against the identity provider with a client
//! secret that itself has to be rotated from time to time. Rotation is the
//! one place where several concerns meet: an idempotent external mutation
//! (adding/removing an application password on the provider), crash-safe
//! staging through a write-ahead log, a dual-write of stored configuration,
//! and invalidation of a lazily built provider client.
//!
//! # Components
//!
//! - [`config::ConfigStore`]: typed read/write of the singleton mount
//!   configuration, including versioned upgrade of legacy field names
//! - [`provider::ProviderClient`]: capability trait over the identity
//!   provider, with a Microsoft Graph backed implementation and a
//!   fingerprint-checked client cache
//! - [`wal::WalStore`]: durable intent records consulted on recovery
//! - [`Backend`]: the per-mount value tying everything together; its
//!   `rotate_root` entry point is the only code path that mutates the
//!   authenticating credential
//!
//! # Rotation lifecycle
//!
//! ```text
//! Idle ──rotate_root()──▶ Staged ──promote──▶ Idle (new secret active)
//!  ▲                         │
//!  └──── WAL rollback ───────┘
//! ```
//!
//! A rotation creates the new password on the provider first, records a WAL
//! entry, stages the new secret next to the still-active one, and deletes
//! the WAL entry. The next operation that needs a provider client promotes
//! the staged secret and removes the previous provider-side password.
//! Recovery after a crash clears staged fields and lets the orphaned
//! provider-side password expire on its own.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod backend;
/// Singleton mount configuration and its store
pub mod config;
/// Core types: errors, operation context, secret handling, time helpers
pub mod core;
/// Identity-provider capability trait, Graph client, client cache
pub mod provider;
/// Rotation orchestration: `rotate_root`, promotion, WAL rollback
pub mod rotation;
/// Host storage facade
pub mod storage;
/// Recording fakes for tests
pub mod testing;
/// Write-ahead log of rotation intents
pub mod wal;

pub use backend::{Backend, ConfigUpdate};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::backend::{Backend, ConfigUpdate};
    pub use crate::config::{ConfigSnapshot, ConfigStore, ConfigView};
    pub use crate::core::{ErrorKind, OperationContext, Result, RotationError, SecretString};
    pub use crate::provider::{
        Application, ClientFactory, PasswordCredential, ProviderClient, ProviderError,
    };
    pub use crate::rotation::RotationOutcome;
    pub use crate::storage::{Entry, StorageBackend};
    pub use crate::wal::{WalId, WalKind, WalRecord, WalStore};
    pub use async_trait::async_trait;
}

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
