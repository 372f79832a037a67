//! Cancellation context passed to every operation
//!
//! No ambient timeout is assumed anywhere in the crate; callers that want a
//! deadline cancel the token themselves. Tests drive deterministic timeouts
//! the same way.

use tokio_util::sync::CancellationToken;

use super::error::{Result, RotationError};

/// Context carried through every blocking operation
///
/// Cancellation observed during a provider call aborts the call; a rotation
/// cancelled after the provider-side password was created behaves like a
/// crash at that point, and the WAL recovery path cleans up.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    cancel: CancellationToken,
}

impl OperationContext {
    /// Create a context that is never cancelled externally
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context driven by the given token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// The underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Error out if the context has been cancelled
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(RotationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve when the context is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
