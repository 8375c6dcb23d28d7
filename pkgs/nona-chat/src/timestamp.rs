//! Timestamp normalization at the store boundary
//!
//! Records read from the hosted store may carry epoch milliseconds, RFC 3339
//! strings or `{seconds, nanoseconds}` objects. They are all turned into
//! [`Timestamp`] while deserializing, so nothing past this module ever sees a
//! raw representation.

use crate::types::Timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Text(String),
    Parts {
        #[serde(alias = "_seconds")]
        seconds: i64,
        #[serde(default, alias = "_nanoseconds", alias = "nanos")]
        nanoseconds: u32,
    },
}

impl WireTimestamp {
    fn normalize(self) -> Result<Timestamp, String> {
        match self {
            WireTimestamp::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| format!("timestamp out of range: {}ms", ms)),
            WireTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("invalid timestamp '{}': {}", text, e)),
            WireTimestamp::Parts {
                seconds,
                nanoseconds,
            } => DateTime::from_timestamp(seconds, nanoseconds)
                .ok_or_else(|| format!("timestamp out of range: {}s", seconds)),
        }
    }
}

/// Deserialize any supported representation into a [`Timestamp`]
pub fn deserialize<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    WireTimestamp::deserialize(deserializer)?
        .normalize()
        .map_err(serde::de::Error::custom)
}

/// Same as [`deserialize`] for optional fields
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<WireTimestamp>::deserialize(deserializer)?
        .map(WireTimestamp::normalize)
        .transpose()
        .map_err(serde::de::Error::custom)
}
