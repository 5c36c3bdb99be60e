//! Outbound delivery of replies.
//!
//! Delivery is best effort. It is not covered by the idempotency guarantee, and
//! a failed delivery never changes the ledger.

use std::future::Future;

use thiserror::Error;

use crate::types::ChannelId;

pub mod slack;

pub use slack::{SLACK_API_BASE, SlackNotifier};

/// Errors returned by a [`Notifier`].
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The sink answered with a non-success HTTP status.
    #[error("notification sink returned HTTP {0}")]
    Status(u16),

    /// The sink accepted the request but refused the message.
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Delivers a reply to a destination channel.
pub trait Notifier: Send + Sync {
    fn deliver(
        &self,
        channel: &ChannelId,
        text: &str,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}
