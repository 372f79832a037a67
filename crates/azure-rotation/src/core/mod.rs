//! Core types shared across the crate

mod context;
mod error;
mod secret;
pub(crate) mod time;

pub use context::OperationContext;
pub use error::{ErrorKind, Result, RotationError, StorageError};
pub use secret::SecretString;
pub use time::DEFAULT_ROOT_PASSWORD_TTL;
