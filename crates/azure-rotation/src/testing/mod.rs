//! Recording fakes for tests
//!
//! Exported from the crate so integration tests under `tests/` can drive
//! the backend against a scripted identity provider and storage with
//! failure injection.

mod fake;
mod storage;

pub use fake::{FakeClientFactory, FakeProvider, ProviderCall};
pub use storage::MockStorage;
