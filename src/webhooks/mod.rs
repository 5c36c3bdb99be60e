//! Inbound Slack webhooks.
//!
//! This module provides:
//! - Request signature verification (HMAC-SHA256, `v0` scheme)
//! - Events API payload parsing and mention text cleanup

pub mod events;
pub mod signature;

pub use events::{AppMention, InboundMessage, ParseError, parse_inbound, strip_mention};
pub use signature::{
    MAX_CLOCK_SKEW_SECS, SignatureError, compute_signature, format_signature_header,
    parse_signature_header, verify_request, verify_signature,
};
