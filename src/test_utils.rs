//! Shared test doubles and arbitrary generators for property-based testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Duration;
use proptest::prelude::*;

use crate::executor::{ExecutorError, WorkExecutor, WorkRequest, WorkResponse};
use crate::ledger::{
    EventRecord, EventStatus, InMemoryLedger, InsertOutcome, LedgerError, LedgerStore, Result,
};
use crate::notify::{Notifier, NotifyError};
use crate::types::{ChannelId, EventId};

pub fn arb_status() -> impl Strategy<Value = EventStatus> {
    prop_oneof![
        Just(EventStatus::InProcess),
        Just(EventStatus::Done),
        Just(EventStatus::Failed),
    ]
}

/// Event ids shaped like Slack's (`Ev` followed by uppercase alphanumerics).
pub fn arb_event_id() -> impl Strategy<Value = EventId> {
    "Ev[0-9A-Z]{8,12}".prop_map(EventId::new)
}

// ─── Ledger ───

#[derive(Debug, Default)]
struct Faults {
    get: AtomicBool,
    put: AtomicBool,
    update: AtomicBool,
    /// Number of upcoming `get` calls that report no record regardless of
    /// what is stored. Simulates a competing insert landing right after our
    /// read.
    hidden_gets: AtomicUsize,
}

/// An [`InMemoryLedger`] whose operations can be made to fail on demand.
#[derive(Debug, Clone, Default)]
pub struct FlakyLedger {
    inner: InMemoryLedger,
    faults: Arc<Faults>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store underneath, for seeding and inspecting records.
    pub fn inner(&self) -> &InMemoryLedger {
        &self.inner
    }

    pub fn fail_gets(&self, fail: bool) {
        self.faults.get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.faults.put.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.faults.update.store(fail, Ordering::SeqCst);
    }

    pub fn hide_next_gets(&self, count: usize) {
        self.faults.hidden_gets.store(count, Ordering::SeqCst);
    }

    fn take_hidden_get(&self) -> bool {
        self.faults
            .hidden_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn injected(op: &str) -> LedgerError {
    LedgerError::Unavailable(format!("injected {op} failure"))
}

impl LedgerStore for FlakyLedger {
    async fn get(&self, event_id: &EventId) -> Result<Option<EventRecord>> {
        if self.faults.get.load(Ordering::SeqCst) {
            return Err(injected("get"));
        }
        if self.take_hidden_get() {
            return Ok(None);
        }
        self.inner.get(event_id).await
    }

    async fn put_if_absent(&self, event_id: &EventId, ttl: Duration) -> Result<InsertOutcome> {
        if self.faults.put.load(Ordering::SeqCst) {
            return Err(injected("put"));
        }
        self.inner.put_if_absent(event_id, ttl).await
    }

    async fn update_status(&self, event_id: &EventId, status: EventStatus) -> Result<()> {
        if self.faults.update.load(Ordering::SeqCst) {
            return Err(injected("update"));
        }
        self.inner.update_status(event_id, status).await
    }

    async fn reopen(&self, event_id: &EventId, ttl: Duration) -> Result<()> {
        if self.faults.update.load(Ordering::SeqCst) {
            return Err(injected("reopen"));
        }
        self.inner.reopen(event_id, ttl).await
    }
}

// ─── Executor ───

/// One scripted executor response.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail,
    Panic,
    /// Sleep, then reply `"slow"`.
    Sleep(StdDuration),
}

/// A [`WorkExecutor`] that plays back [`Step`]s in order, repeating the last
/// one once the script runs out.
#[derive(Debug, Clone)]
pub struct ScriptedExecutor {
    steps: Arc<Mutex<VecDeque<Step>>>,
    requests: Arc<Mutex<Vec<WorkRequest>>>,
}

impl ScriptedExecutor {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let steps: VecDeque<Step> = steps.into_iter().collect();
        assert!(!steps.is_empty(), "script needs at least one step");
        ScriptedExecutor {
            steps: Arc::new(Mutex::new(steps)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new([Step::Reply(text.to_string())])
    }

    /// Number of times `run` has been called.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<WorkRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps[0].clone()
        }
    }
}

impl WorkExecutor for ScriptedExecutor {
    async fn run(&self, request: WorkRequest) -> std::result::Result<WorkResponse, ExecutorError> {
        self.requests.lock().unwrap().push(request);

        match self.next_step() {
            Step::Reply(text) => Ok(WorkResponse { text }),
            Step::Fail => Err(ExecutorError::Other("scripted failure".to_string())),
            Step::Panic => panic!("scripted panic"),
            Step::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(WorkResponse {
                    text: "slow".to_string(),
                })
            }
        }
    }
}

// ─── Notifier ───

/// A [`Notifier`] that records every delivery attempt.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    deliveries: Arc<Mutex<Vec<(ChannelId, String)>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail (after being recorded).
    pub fn fail_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<(ChannelId, String)> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    async fn deliver(&self, channel: &ChannelId, text: &str) -> std::result::Result<(), NotifyError> {
        self.deliveries
            .lock()
            .unwrap()
            .push((channel.clone(), text.to_string()));

        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected("injected".to_string()));
        }
        Ok(())
    }
}
