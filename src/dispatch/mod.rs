//! Per-event dispatch: guard, work, reply, bookkeeping.
//!
//! ```text
//! admit ──► Skip ────────────────────────────────────────► Skipped
//!   │
//!   └─► Admit / RetryAdmit ──► run work ──► Ok  ──► deliver ──► complete(Done)   ──► Done
//!                                      └──► Err ─────────────► complete(Failed) ──► Failed
//! ```
//!
//! The work runs on its own task under a deadline, so a panic or a hang in the
//! executor still ends in `complete(Failed)` rather than a record stranded in
//! `in process` until it expires.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::executor::{ExecutorError, WorkExecutor, WorkRequest, WorkResponse};
use crate::guard::{Completion, Decision, EventGuard, SkipReason};
use crate::ledger::LedgerStore;
use crate::notify::Notifier;
use crate::types::UserId;
use crate::webhooks::{AppMention, strip_mention};

/// Default deadline for one run of the work. Kept below the default record
/// TTL so a timed-out run is recorded before its record could expire.
pub const DEFAULT_WORK_TIMEOUT: Duration = Duration::from_secs(240);

/// Why admitted work produced no reply.
#[derive(Debug, Error)]
pub enum WorkFailure {
    #[error("executor failed: {0}")]
    Executor(#[from] ExecutorError),

    #[error("work timed out")]
    TimedOut,

    #[error("work panicked")]
    Panicked,
}

/// What happened to one dispatched mention.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The guard refused the event; the work did not run.
    Skipped(SkipReason),
    /// The work succeeded and the event is recorded `done`. `delivered` is
    /// false if posting the reply failed.
    Done { delivered: bool },
    /// The work failed and the event is recorded `failed`.
    Failed(WorkFailure),
}

/// Runs mentions through the guard, the executor and the notifier.
///
/// All collaborators are passed in; cloning shares them.
#[derive(Debug)]
pub struct Dispatcher<L, E, N> {
    guard: EventGuard<L>,
    executor: Arc<E>,
    notifier: N,
    bot_user_id: Option<UserId>,
    work_timeout: Duration,
}

impl<L: Clone, E, N: Clone> Clone for Dispatcher<L, E, N> {
    fn clone(&self) -> Self {
        Dispatcher {
            guard: self.guard.clone(),
            executor: Arc::clone(&self.executor),
            notifier: self.notifier.clone(),
            bot_user_id: self.bot_user_id.clone(),
            work_timeout: self.work_timeout,
        }
    }
}

impl<L, E, N> Dispatcher<L, E, N>
where
    L: LedgerStore,
    E: WorkExecutor,
    N: Notifier,
{
    pub fn new(guard: EventGuard<L>, executor: Arc<E>, notifier: N) -> Self {
        Dispatcher {
            guard,
            executor,
            notifier,
            bot_user_id: None,
            work_timeout: DEFAULT_WORK_TIMEOUT,
        }
    }

    /// Sets the bot's own user id, whose `<@...>` tokens are removed from the
    /// mention text before it reaches the executor.
    pub fn with_bot_user_id(mut self, bot_user_id: Option<UserId>) -> Self {
        self.bot_user_id = bot_user_id;
        self
    }

    pub fn with_work_timeout(mut self, work_timeout: Duration) -> Self {
        self.work_timeout = work_timeout;
        self
    }

    pub fn guard(&self) -> &EventGuard<L> {
        &self.guard
    }

    /// Processes one mention end to end.
    ///
    /// Never fails: every outcome, including ledger and delivery errors, is
    /// logged and reported in the returned [`DispatchOutcome`].
    #[instrument(
        skip(self, mention),
        fields(
            event_id = %mention.event_id,
            channel = %mention.channel,
            user = mention.user.as_ref().map(UserId::as_str),
            client_msg_id = mention.client_msg_id.as_deref(),
        )
    )]
    pub async fn dispatch(&self, mention: &AppMention) -> DispatchOutcome {
        let event_id = &mention.event_id;

        let decision = self.guard.admit(event_id).await;
        if let Decision::Skip(reason) = decision {
            return DispatchOutcome::Skipped(reason);
        }

        let request = WorkRequest {
            event_id: event_id.clone(),
            channel: mention.channel.clone(),
            text: strip_mention(&mention.text, self.bot_user_id.as_ref()),
            user: mention.user.clone(),
        };

        match self.run_work(request).await {
            Ok(response) => {
                let delivered = match self.notifier.deliver(&mention.channel, &response.text).await
                {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Failed to deliver reply");
                        false
                    }
                };

                self.guard.complete(event_id, Completion::Done).await;
                info!(delivered, "Event processed");
                DispatchOutcome::Done { delivered }
            }
            Err(failure) => {
                warn!(error = %failure, "Work failed");
                self.guard.complete(event_id, Completion::Failed).await;
                DispatchOutcome::Failed(failure)
            }
        }
    }

    async fn run_work(&self, request: WorkRequest) -> Result<WorkResponse, WorkFailure> {
        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.run(request).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.work_timeout, handle).await {
            Ok(Ok(result)) => result.map_err(WorkFailure::from),
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "Work task did not finish");
                Err(WorkFailure::Panicked)
            }
            Err(_elapsed) => {
                abort.abort();
                Err(WorkFailure::TimedOut)
            }
        }
    }
}
