//! The processing ledger: a shared key-value store of event records.
//!
//! The ledger is the only coordination medium between handler invocations.
//! Invocations share no memory; two of them racing on the same event id are
//! arbitrated solely by [`LedgerStore::put_if_absent`], whose atomicity is the
//! store's responsibility.
//!
//! # Contract
//!
//! - `get` is a side-effect-free point lookup. Stores reclaim expired records
//!   lazily, so `get` may return a record whose `expires_at` has passed; callers
//!   must treat such a record as absent.
//! - `put_if_absent` inserts an `InProcess` record only when no live record
//!   exists (absent or expired). Concurrent callers: exactly one observes
//!   [`InsertOutcome::Inserted`], the rest observe [`InsertOutcome::AlreadyExists`].
//! - `update_status` unconditionally replaces the status of an existing record,
//!   keeping its expiry.
//! - `reopen` unconditionally moves an existing record back to `InProcess`
//!   with a fresh expiry, so a retried event gets a full TTL.
//!
//! Nothing is assumed to be atomic across two calls.

use std::future::Future;
use std::io;

use chrono::Duration;
use thiserror::Error;

use crate::types::EventId;

pub mod file;
pub mod memory;
pub mod record;

pub use file::FileLedger;
pub use memory::InMemoryLedger;
pub use record::{EventRecord, EventStatus, UnknownStatus};

/// Errors returned by ledger stores.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// IO error talking to the backing storage.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A stored record could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `update_status` was called for an event with no record.
    #[error("no ledger record for event {0}")]
    NotFound(EventId),

    /// The event id cannot be used as a key by this store.
    #[error("invalid event ID: {0}")]
    InvalidEventId(EventId),

    /// A record carried a status flag outside the known set.
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),

    /// The store refused or failed the request.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Outcome of [`LedgerStore::put_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This caller created the record and now owns the event.
    Inserted,
    /// A live record already existed (possibly created by a concurrent caller).
    AlreadyExists,
}

/// A shared, durable store of [`EventRecord`]s keyed by event id.
///
/// Implementations are handles: cloning or sharing one must address the same
/// underlying store, the way separate processes would.
pub trait LedgerStore: Send + Sync {
    /// Looks up the record for `event_id`, expired or not.
    fn get(
        &self,
        event_id: &EventId,
    ) -> impl Future<Output = Result<Option<EventRecord>>> + Send;

    /// Atomically inserts an `InProcess` record expiring after `ttl`, unless a
    /// live record exists.
    fn put_if_absent(
        &self,
        event_id: &EventId,
        ttl: Duration,
    ) -> impl Future<Output = Result<InsertOutcome>> + Send;

    /// Overwrites the status of an existing record.
    fn update_status(
        &self,
        event_id: &EventId,
        status: EventStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Marks an existing record `InProcess` again, expiring `ttl` from now.
    fn reopen(&self, event_id: &EventId, ttl: Duration) -> impl Future<Output = Result<()>> + Send;
}

/// Checks that an event id is safe to use as a storage key.
///
/// Slack event ids are short alphanumerics (`Ev08MFMKH6`). We reject anything
/// that could escape a directory or collide with bookkeeping files:
/// - empty ids
/// - path separators (`/` or `\`) and NUL bytes
/// - a leading dot (hidden files, `.` and `..`)
pub fn validate_event_id(event_id: &EventId) -> Result<()> {
    let id = event_id.as_str();

    if id.is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
        || id.starts_with('.')
    {
        return Err(LedgerError::InvalidEventId(event_id.clone()));
    }

    Ok(())
}
