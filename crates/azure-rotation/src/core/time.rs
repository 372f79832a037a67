//! Time constants and serde helpers

use std::time::Duration;

/// Default lifetime of a rotated root password when the configured TTL is
/// zero: six months, expressed as 4,380 hours.
pub const DEFAULT_ROOT_PASSWORD_TTL: Duration = Duration::from_secs(4_380 * 60 * 60);

/// Serialize a `Duration` as integer seconds
pub(crate) mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
