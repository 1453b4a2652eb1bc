//! Lenient `Option<DateTime<Utc>>` serde adapter.
//!
//! The remote store has written `updatedAt` in several shapes over time:
//! RFC 3339 strings, epoch milliseconds, and `{ seconds, nanoseconds }`
//! objects for server timestamps. All of them read back as a `DateTime`;
//! writes always use RFC 3339.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    FractionalMillis(f64),
    Text(String),
    Server {
        #[serde(alias = "_seconds")]
        seconds: i64,
        #[serde(default, alias = "_nanoseconds", alias = "nanos")]
        nanoseconds: u32,
    },
}

pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let parsed = match raw {
        RawTimestamp::Millis(ms) => Utc.timestamp_millis_opt(ms).single(),
        RawTimestamp::FractionalMillis(ms) => Utc.timestamp_millis_opt(ms as i64).single(),
        RawTimestamp::Text(text) => Some(
            DateTime::parse_from_rfc3339(&text)
                .map_err(D::Error::custom)?
                .with_timezone(&Utc),
        ),
        RawTimestamp::Server {
            seconds,
            nanoseconds,
        } => Utc.timestamp_opt(seconds, nanoseconds).single(),
    };
    parsed
        .map(Some)
        .ok_or_else(|| D::Error::custom("timestamp out of range"))
}

/// Milliseconds used for ordering; a missing timestamp orders as the epoch.
pub fn sort_millis(value: Option<&DateTime<Utc>>) -> i64 {
    value.map(DateTime::timestamp_millis).unwrap_or(0)
}
