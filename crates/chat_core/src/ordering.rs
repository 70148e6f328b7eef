//! Total-order comparator for timeline entries.
//!
//! Primary key is the message timestamp, ascending. Zone-less timestamp
//! strings are interpreted as UTC. Unparseable timestamps map to a maximal
//! sentinel so the message still appears (at the end of the timeline) rather
//! than aborting the stream. Equal timestamps fall back to the message type
//! weight: TEXT before IMAGE before FORM.

use chrono::{DateTime, NaiveDateTime, Utc};
use shared::protocol::ChatMessage;

/// Precomputed ordering key, derived once when a message is ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    timestamp: DateTime<Utc>,
    type_weight: u8,
}

impl SortKey {
    pub fn of(message: &ChatMessage) -> Self {
        Self {
            timestamp: parse_timestamp(&message.timestamp).unwrap_or(DateTime::<Utc>::MAX_UTC),
            type_weight: message.message_type.weight(),
        }
    }

    /// None when the raw timestamp string did not parse.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        (self.timestamp != DateTime::<Utc>::MAX_UTC).then_some(self.timestamp)
    }
}

/// Lenient ISO-8601 parse. Accepts a full RFC 3339 string or a zone-less
/// `YYYY-MM-DDTHH:MM:SS[.fff]`, which is taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(zoned) = DateTime::parse_from_rfc3339(raw) {
        return Some(zoned.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
#[path = "tests/ordering_tests.rs"]
mod tests;
