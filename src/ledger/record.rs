//! Ledger record and status types.
//!
//! The status is a closed enum. Stores persist it as the ledger's flag strings
//! (`"in process"`, `"done"`, `"failed"`); any other stored value surfaces as
//! [`UnknownStatus`] instead of being guessed at.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::EventId;

/// Processing state of an event that has a ledger record.
///
/// The implicit fourth state, NEW, is the absence of a (live) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventStatus {
    /// An invocation has claimed the event and is running the work.
    InProcess,
    /// The work completed successfully. Terminal.
    Done,
    /// The work failed; the next redelivery may retry it.
    Failed,
}

impl EventStatus {
    /// Returns the stored flag string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::InProcess => "in process",
            EventStatus::Done => "done",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored status flag that is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event status flag: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for EventStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in process" => Ok(EventStatus::InProcess),
            "done" => Ok(EventStatus::Done),
            "failed" => Ok(EventStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for EventStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventStatus> for String {
    fn from(status: EventStatus) -> Self {
        status.as_str().to_string()
    }
}

/// One ledger entry per distinct event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub status: EventStatus,
    /// Absolute expiry. Stored as epoch seconds, like a platform TTL attribute.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl EventRecord {
    /// Creates a fresh `InProcess` record expiring `ttl` after `now`.
    pub fn in_process(event_id: EventId, now: DateTime<Utc>, ttl: Duration) -> Self {
        EventRecord {
            event_id,
            status: EventStatus::InProcess,
            expires_at: now + ttl,
        }
    }

    /// Returns true once `now` has reached the expiry instant.
    ///
    /// An expired record is equivalent to no record at all.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::arb_status;
    use proptest::prelude::*;

    #[test]
    fn parses_known_flags() {
        assert_eq!("in process".parse(), Ok(EventStatus::InProcess));
        assert_eq!("done".parse(), Ok(EventStatus::Done));
        assert_eq!("failed".parse(), Ok(EventStatus::Failed));
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let err = "processing".parse::<EventStatus>().unwrap_err();
        assert_eq!(err, UnknownStatus("processing".to_string()));

        // Case matters: the store is written by us, never by humans.
        assert!("DONE".parse::<EventStatus>().is_err());
    }

    #[test]
    fn record_json_uses_flag_strings_and_epoch_seconds() {
        let expires_at = DateTime::from_timestamp(1_700_000_300, 0).unwrap();
        let record = EventRecord {
            event_id: EventId::new("Ev1"),
            status: EventStatus::InProcess,
            expires_at,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "event_id": "Ev1",
                "status": "in process",
                "expires_at": 1_700_000_300
            })
        );
    }

    #[test]
    fn record_with_unknown_status_fails_to_deserialize() {
        let json = r#"{"event_id":"Ev1","status":"queued","expires_at":1700000000}"#;
        let result: Result<EventRecord, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let record = EventRecord::in_process(EventId::new("Ev1"), now, Duration::seconds(300));

        assert!(!record.is_expired(now));
        assert!(!record.is_expired(now + Duration::seconds(299)));
        assert!(record.is_expired(now + Duration::seconds(300)));
    }

    proptest! {
        #[test]
        fn status_string_conversion_is_lossless(status in arb_status()) {
            let flag: String = status.into();
            prop_assert_eq!(flag.parse::<EventStatus>(), Ok(status));
        }
    }
}
