//! Error types for rotation operations
//!
//! A two-tier hierarchy in the usual shape: [`RotationError`] at the top,
//! with [`StorageError`] and [`crate::provider::ProviderError`] feeding into
//! it via `From`. Callers that need to dispatch on failure class use
//! [`RotationError::kind`] rather than string-matching wrapped errors.

use thiserror::Error;

use crate::provider::ProviderError;

/// Failure class of a [`RotationError`]
///
/// Recovery paths dispatch on this discriminant. `Wal` covers both a plain
/// WAL failure and the combined case where compensating cleanup also failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-facing configuration or input error
    Validation,
    /// Host storage failure
    Storage,
    /// Identity-provider failure
    Provider,
    /// Write-ahead log failure
    Wal,
    /// Operation was cancelled before completion
    Cancelled,
}

/// Top-level error for rotation operations
#[derive(Debug, Error)]
pub enum RotationError {
    /// Invalid configuration or input; never a panic, always surfaced
    /// to the caller as a structured response
    #[error("validation error: {0}")]
    Validation(String),

    /// Host storage failed; rotation aborts and the error propagates verbatim
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The identity provider rejected or failed an operation
    #[error("provider error: {0}")]
    Provider(#[source] ProviderError),

    /// Write-ahead log operation failed
    #[error("wal error: {0}")]
    Wal(String),

    /// WAL staging failed after a provider-side password was created, and
    /// the compensating password removal failed as well
    #[error("wal error: {wal}; removing orphaned password credential failed: {cleanup}")]
    WalCleanup {
        /// The original WAL failure
        wal: String,
        /// The failure of the compensating `remove_application_password`
        cleanup: String,
    },

    /// The operation's cancellation context fired
    #[error("operation cancelled")]
    Cancelled,
}

impl RotationError {
    /// Build a validation error from any displayable message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a WAL error from any displayable message
    pub fn wal(msg: impl Into<String>) -> Self {
        Self::Wal(msg.into())
    }

    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Wal(_) | Self::WalCleanup { .. } => ErrorKind::Wal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<ProviderError> for RotationError {
    fn from(source: ProviderError) -> Self {
        match source {
            ProviderError::Cancelled => Self::Cancelled,
            other => Self::Provider(other),
        }
    }
}

/// Host storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store reported a failure
    #[error("storage backend failure at '{path}': {message}")]
    Backend {
        /// Storage path of the failed operation
        path: String,
        /// Backend-provided failure description
        message: String,
    },

    /// A stored entry could not be decoded
    #[error("stored entry at '{path}' is corrupt: {message}")]
    Corrupt {
        /// Storage path of the undecodable entry
        path: String,
        /// Decode failure description
        message: String,
    },
}

/// Result type alias for rotation operations
pub type Result<T> = std::result::Result<T, RotationError>;
