//! Serde helpers for configuration types
//!
//! Durations cross the configuration boundary (TOML, JSON, environment
//! variables) as integer milliseconds, matching the `*_ms` field names used
//! throughout ProjectHub config files.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a `Duration` as integer milliseconds
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use projecthub_common::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Settings {
///     #[serde(with = "duration_millis", rename = "timeout_ms")]
///     timeout: Duration,
///     #[serde(default, with = "duration_millis::option")]
///     max_delay: Option<Duration>,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Whole milliseconds in `duration`, saturating at `u64::MAX`
    pub fn to_millis(duration: &Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(to_millis(duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    /// Same encoding for optional durations; `null` or a missing field maps
    /// to `None` (pair with `#[serde(default)]`).
    pub mod option {
        use super::*;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
        where
            S: Serializer,
        {
            match duration {
                Some(duration) => serializer.serialize_some(&to_millis(duration)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let millis = Option::<u64>::deserialize(deserializer)?;
            Ok(millis.map(Duration::from_millis))
        }
    }
}
