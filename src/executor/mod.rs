//! The unit of work the guard protects.
//!
//! From the guard's point of view the work (fetch the dataset, ask the
//! reasoning service, produce a reply) is one opaque, fallible call. Failure is
//! an explicit `Err`, never an unwinding panic used for control flow.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChannelId, EventId, UserId};

pub mod http;

pub use http::{HttpExecutor, HttpExecutorConfig};

/// Input to the work: the mention that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub event_id: EventId,
    pub channel: ChannelId,
    /// Mention text with the bot's own `<@...>` token removed.
    pub text: String,
    /// Who mentioned the bot, if Slack said.
    pub user: Option<UserId>,
}

/// Output of the work: the reply to post back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkResponse {
    pub text: String,
}

/// Errors returned by a [`WorkExecutor`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Could not reach the service, or the connection failed mid-request.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered 2xx with a body we cannot use.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Any other failure reported by an executor implementation.
    #[error("{0}")]
    Other(String),
}

/// Runs the work for one admitted event.
///
/// Called at most once per successful admission. Implementations must be
/// shareable across tasks: the dispatcher runs each call on its own task so a
/// panic inside the work is contained.
///
/// # Example (test double)
///
/// ```ignore
/// struct Echo;
///
/// impl WorkExecutor for Echo {
///     fn run(&self, request: WorkRequest)
///         -> impl Future<Output = Result<WorkResponse, ExecutorError>> + Send
///     {
///         async move { Ok(WorkResponse { text: request.text }) }
///     }
/// }
/// ```
pub trait WorkExecutor: Send + Sync + 'static {
    /// Runs the work and returns the reply, or why it could not be produced.
    fn run(
        &self,
        request: WorkRequest,
    ) -> impl Future<Output = Result<WorkResponse, ExecutorError>> + Send;
}
