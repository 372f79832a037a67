//! Singleton mount configuration
//!
//! One [`ConfigSnapshot`] per mount, stored at the fixed path `"config"`.
//! [`ConfigStore`] is the sole path through which the snapshot is read or
//! written; it owns schema versioning and the validation rules.

mod snapshot;
mod store;

pub use snapshot::{CONFIG_VERSION, ConfigSnapshot, ConfigView};
pub use store::{CONFIG_PATH, ConfigStore};
