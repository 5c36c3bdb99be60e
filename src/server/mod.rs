//! HTTP server for the Slack bot.
//!
//! # Endpoints
//!
//! - `POST /slack/events` - Slack Events API deliveries (always 200 once authentic)
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use axum::routing::{get, post};
use tokio_util::task::TaskTracker;

use crate::dispatch::Dispatcher;
use crate::executor::WorkExecutor;
use crate::ledger::LedgerStore;
use crate::notify::Notifier;

pub mod events;
pub mod health;

pub use events::{EventsError, events_handler};
pub use health::health_handler;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<L, E, N> {
    inner: Arc<AppStateInner<L, E, N>>,
}

struct AppStateInner<L, E, N> {
    dispatcher: Dispatcher<L, E, N>,

    /// Slack signing secret. `None` disables signature verification.
    signing_secret: Option<Vec<u8>>,

    /// Dispatches still running after their request was acknowledged.
    tasks: TaskTracker,
}

// Manual impl: cloning shares the inner state, so no bounds on L, E, N.
impl<L, E, N> Clone for AppState<L, E, N> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L, E, N> AppState<L, E, N> {
    pub fn new(dispatcher: Dispatcher<L, E, N>, signing_secret: Option<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                dispatcher,
                signing_secret,
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<L, E, N> {
        &self.inner.dispatcher
    }

    pub fn signing_secret(&self) -> Option<&[u8]> {
        self.inner.signing_secret.as_deref()
    }

    /// Tracker of in-flight dispatches. Close and wait on it at shutdown so
    /// admitted events reach `done` or `failed`.
    pub fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<L, E, N>(app_state: AppState<L, E, N>) -> axum::Router
where
    L: LedgerStore + Clone + 'static,
    E: WorkExecutor,
    N: Notifier + Clone + 'static,
{
    axum::Router::new()
        .route("/slack/events", post(events_handler::<L, E, N>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::EventGuard;
    use crate::ledger::InMemoryLedger;
    use crate::test_utils::{RecordingNotifier, ScriptedExecutor};

    fn dispatcher() -> Dispatcher<InMemoryLedger, ScriptedExecutor, RecordingNotifier> {
        Dispatcher::new(
            EventGuard::with_default_ttl(InMemoryLedger::new()),
            Arc::new(ScriptedExecutor::replying("ok")),
            RecordingNotifier::new(),
        )
    }

    #[test]
    fn app_state_accessors_work() {
        let state = AppState::new(dispatcher(), Some(b"secret".to_vec()));
        assert_eq!(state.signing_secret(), Some(&b"secret"[..]));

        let unsigned = AppState::new(dispatcher(), None);
        assert_eq!(unsigned.signing_secret(), None);
    }

    #[test]
    fn app_state_clone_shares_dispatcher() {
        let state = AppState::new(dispatcher(), None);
        let cloned = state.clone();

        assert!(std::ptr::eq(state.dispatcher(), cloned.dispatcher()));
    }
}
