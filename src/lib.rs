//! Event Guard - an idempotent Slack event handler.
//!
//! Slack redelivers events it considers unacknowledged, so the same mention can
//! arrive several times, possibly concurrently. This library records each
//! event's processing state in a shared ledger and lets exactly one invocation
//! run the (expensive, side-effecting) work per event.

pub mod config;
pub mod dispatch;
pub mod executor;
pub mod guard;
pub mod ledger;
pub mod notify;
pub mod persistence;
pub mod server;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;
