//! The idempotency guard.
//!
//! Decides, per event id, whether this invocation may run the work, and
//! records how the work ended. All state lives in the ledger; the guard itself
//! is stateless and cheap to clone.
//!
//! # State machine
//!
//! ```text
//!            admit (insert wins)            complete(Done)
//!   NEW ─────────────────────────► IN_PROCESS ─────────────► DONE (terminal)
//!    ▲                               │    ▲
//!    │ expiry                        │    │ admit (retry)
//!    └───────────────────────────────┘    │
//!                                complete(Failed)
//!                                    ▼    │
//!                                  FAILED ┘
//! ```
//!
//! | Stored record         | `admit` result                     |
//! |-----------------------|------------------------------------|
//! | none / expired        | insert wins → `Admit`, loses → re-read |
//! | `done`                | `Skip(AlreadyDone)`                |
//! | `in process`          | `Skip(InProgress)`                 |
//! | `failed`              | → `in process` (fresh TTL), `RetryAdmit` |
//!
//! An `in process` record is skipped whether its owner is still running or
//! crashed; only expiry frees it. Ledger failures skip (fail closed): dropping
//! an event is preferred over running it twice.

use std::fmt;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::ledger::{EventRecord, EventStatus, InsertOutcome, LedgerStore};
use crate::types::EventId;


/// Default record TTL: five minutes, longer than any expected run of the work.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Why an event was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The event already completed successfully.
    AlreadyDone,
    /// Another invocation holds the event (or crashed holding it).
    InProgress,
    /// The ledger could not be read or written.
    LedgerUnavailable,
    /// The record changed under us twice in a row.
    Contended,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::AlreadyDone => "already done",
            SkipReason::InProgress => "in progress",
            SkipReason::LedgerUnavailable => "ledger unavailable",
            SkipReason::Contended => "contended",
        };
        f.write_str(s)
    }
}

/// Result of [`EventGuard::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// First admission: this invocation inserted the `in process` record.
    Admit,
    /// A failed event was moved back to `in process` for another attempt.
    RetryAdmit,
    /// Do not run the work.
    Skip(SkipReason),
}

impl Decision {
    /// Returns true if the caller now owns the event and must run the work.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit | Decision::RetryAdmit)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Admit => f.write_str("admit"),
            Decision::RetryAdmit => f.write_str("retry admit"),
            Decision::Skip(reason) => write!(f, "skip ({})", reason),
        }
    }
}

/// How admitted work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    Failed,
}

impl Completion {
    fn status(self) -> EventStatus {
        match self {
            Completion::Done => EventStatus::Done,
            Completion::Failed => EventStatus::Failed,
        }
    }
}

/// The idempotency state machine over a [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct EventGuard<L> {
    ledger: L,
    ttl: Duration,
}

/// What a single read of the ledger tells `admit` to do next.
enum Resolution {
    Decided(Decision),
    /// No live record: try to insert one.
    Absent,
}

impl<L: LedgerStore> EventGuard<L> {
    /// Creates a guard whose records expire `ttl` after admission.
    ///
    /// `ttl` bounds how long a crashed invocation can block retries and must
    /// exceed the worst-case duration of the work.
    pub fn new(ledger: L, ttl: Duration) -> Self {
        EventGuard { ledger, ttl }
    }

    /// Creates a guard with [`DEFAULT_TTL_SECS`].
    pub fn with_default_ttl(ledger: L) -> Self {
        Self::new(ledger, Duration::seconds(DEFAULT_TTL_SECS))
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Decides whether this invocation may process `event_id`.
    ///
    /// On `Admit` or `RetryAdmit` the record is already `in process` and owned
    /// by the caller, who must eventually call [`complete`](Self::complete).
    pub async fn admit(&self, event_id: &EventId) -> Decision {
        let decision = self.admit_inner(event_id).await;

        match decision {
            Decision::Admit => info!(event_id = %event_id, "Admitted event"),
            Decision::RetryAdmit => info!(event_id = %event_id, "Event previously failed, retrying"),
            Decision::Skip(reason) => {
                debug!(event_id = %event_id, reason = %reason, "Skipping event")
            }
        }

        decision
    }

    async fn admit_inner(&self, event_id: &EventId) -> Decision {
        match self.read(event_id).await {
            Resolution::Decided(decision) => return decision,
            Resolution::Absent => {}
        }

        match self.ledger.put_if_absent(event_id, self.ttl).await {
            Ok(InsertOutcome::Inserted) => return Decision::Admit,
            Ok(InsertOutcome::AlreadyExists) => {}
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Failed to mark event in process");
                return Decision::Skip(SkipReason::LedgerUnavailable);
            }
        }

        // Lost the insert race: resolve against the winner's record.
        match self.read(event_id).await {
            Resolution::Decided(decision) => decision,
            // The winner's record vanished too (expired or pruned between our
            // two reads). Leave the event to the next redelivery.
            Resolution::Absent => Decision::Skip(SkipReason::Contended),
        }
    }

    /// Reads the record and resolves every case except "absent".
    async fn read(&self, event_id: &EventId) -> Resolution {
        let record = match self.ledger.get(event_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Failed to look up event status");
                return Resolution::Decided(Decision::Skip(SkipReason::LedgerUnavailable));
            }
        };

        match record {
            None => Resolution::Absent,
            Some(record) => self.resolve_present(event_id, record).await,
        }
    }

    async fn resolve_present(&self, event_id: &EventId, record: EventRecord) -> Resolution {
        if record.is_expired(Utc::now()) {
            debug!(
                event_id = %event_id,
                status = %record.status,
                expired_at = %record.expires_at,
                "Ledger record expired, treating event as new"
            );
            return Resolution::Absent;
        }

        let decision = match record.status {
            EventStatus::Done => Decision::Skip(SkipReason::AlreadyDone),
            EventStatus::InProcess => Decision::Skip(SkipReason::InProgress),
            EventStatus::Failed => {
                // The retry owner gets a full TTL.
                match self.ledger.reopen(event_id, self.ttl).await {
                    Ok(()) => Decision::RetryAdmit,
                    Err(e) => {
                        warn!(event_id = %event_id, error = %e, "Failed to mark failed event in process");
                        Decision::Skip(SkipReason::LedgerUnavailable)
                    }
                }
            }
        };

        Resolution::Decided(decision)
    }

    /// Records the end of admitted work.
    ///
    /// Writes `done` or `failed` unconditionally. Ledger errors are logged and
    /// swallowed: the record then stays `in process` until it expires.
    pub async fn complete(&self, event_id: &EventId, completion: Completion) {
        let status = completion.status();
        match self.ledger.update_status(event_id, status).await {
            Ok(()) => info!(event_id = %event_id, status = %status, "Recorded event outcome"),
            Err(e) => warn!(
                event_id = %event_id,
                status = %status,
                error = %e,
                "Failed to record event outcome"
            ),
        }
    }
}
