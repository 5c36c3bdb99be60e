//! In-memory ledger store.
//!
//! A `HashMap` behind a mutex. Clones share the same map, so handing a clone
//! to each task models independent invocations that meet only at the store.
//! The mutex is the store's atomic primitive; nothing outside this module
//! locks it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use super::{
    EventRecord, EventStatus, InsertOutcome, LedgerError, LedgerStore, Result, validate_event_id,
};
use crate::types::EventId;

/// A process-local ledger shared by cloning.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    records: Arc<Mutex<HashMap<EventId, EventRecord>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` as-is, replacing any existing entry.
    ///
    /// Bypasses the insert-if-absent rule; intended for seeding state such as
    /// records that have already expired.
    pub fn insert_record(&self, record: EventRecord) {
        self.lock().insert(record.event_id.clone(), record);
    }

    /// Returns a copy of the stored record, expired or not.
    pub fn record(&self, event_id: &EventId) -> Option<EventRecord> {
        self.lock().get(event_id).cloned()
    }

    /// Number of stored records, including expired ones.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops records that expired at or before `now`.
    ///
    /// Returns the number of records removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.lock();
        let before_len = records.len();
        records.retain(|_, record| !record.is_expired(now));
        before_len - records.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventId, EventRecord>> {
        // A panic while holding the lock cannot leave a half-written record:
        // every mutation is a single map operation.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerStore for InMemoryLedger {
    async fn get(&self, event_id: &EventId) -> Result<Option<EventRecord>> {
        validate_event_id(event_id)?;
        Ok(self.record(event_id))
    }

    async fn put_if_absent(&self, event_id: &EventId, ttl: Duration) -> Result<InsertOutcome> {
        validate_event_id(event_id)?;

        let now = Utc::now();
        let mut records = self.lock();

        if records
            .get(event_id)
            .is_some_and(|existing| !existing.is_expired(now))
        {
            return Ok(InsertOutcome::AlreadyExists);
        }

        records.insert(
            event_id.clone(),
            EventRecord::in_process(event_id.clone(), now, ttl),
        );
        Ok(InsertOutcome::Inserted)
    }

    async fn update_status(&self, event_id: &EventId, status: EventStatus) -> Result<()> {
        validate_event_id(event_id)?;

        let mut records = self.lock();
        let record = records
            .get_mut(event_id)
            .ok_or_else(|| LedgerError::NotFound(event_id.clone()))?;
        record.status = status;
        Ok(())
    }

    async fn reopen(&self, event_id: &EventId, ttl: Duration) -> Result<()> {
        validate_event_id(event_id)?;

        let mut records = self.lock();
        let record = records
            .get_mut(event_id)
            .ok_or_else(|| LedgerError::NotFound(event_id.clone()))?;
        *record = EventRecord::in_process(event_id.clone(), Utc::now(), ttl);
        Ok(())
    }
}
