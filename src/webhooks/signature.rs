//! Slack request signature verification using HMAC-SHA256.
//!
//! Slack signs each request with the app's signing secret. The signed base
//! string is `v0:<timestamp>:<raw body>`, where the timestamp comes from the
//! `X-Slack-Request-Timestamp` header, and the result is sent in
//! `X-Slack-Signature` as `v0=<hex>`.
//!
//! Requests whose timestamp is more than [`MAX_CLOCK_SKEW_SECS`] away from our
//! clock are rejected even when correctly signed, so a captured request cannot
//! be replayed later.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature scheme version prefix used by Slack.
const VERSION: &str = "v0";

/// Largest accepted distance between the request timestamp and now.
pub const MAX_CLOCK_SKEW_SECS: u64 = 60 * 5;

/// Why a request failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed request timestamp")]
    MalformedTimestamp,

    #[error("request timestamp outside the accepted window")]
    StaleTimestamp,

    #[error("signature mismatch")]
    Mismatch,
}

/// Parses a Slack signature header (e.g. `"v0=abc123..."`) into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, invalid hex, etc.).
/// Never panics.
///
/// # Examples
///
/// ```
/// use event_guard::webhooks::parse_signature_header;
///
/// assert!(parse_signature_header("v0=abcd1234").is_some());
/// assert!(parse_signature_header("abcd1234").is_none());
/// assert!(parse_signature_header("v1=abcd1234").is_none());
/// assert!(parse_signature_header("v0=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("v0=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 of `v0:<timestamp>:<body>` with `secret`.
///
/// Used to produce expected signatures in tests and tooling.
pub fn compute_signature(timestamp: &str, body: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    update_base_string(&mut mac, timestamp, body);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a Slack header value (`v0=<hex>`).
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("{}={}", VERSION, hex::encode(signature))
}

fn update_base_string(mac: &mut HmacSha256, timestamp: &str, body: &[u8]) {
    mac.update(VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
}

/// Verifies a Slack signature against the timestamp, body and secret.
///
/// Returns `true` if the signature is valid. Uses constant-time comparison.
/// Does not check the timestamp's age; see [`verify_request`].
///
/// # Examples
///
/// ```
/// use event_guard::webhooks::{compute_signature, format_signature_header, verify_signature};
///
/// let body = br#"{"type":"event_callback"}"#;
/// let sig = compute_signature("1531420618", body, b"signing-secret");
/// let header = format_signature_header(&sig);
///
/// assert!(verify_signature("1531420618", body, &header, b"signing-secret"));
/// assert!(!verify_signature("1531420619", body, &header, b"signing-secret"));
/// ```
pub fn verify_signature(timestamp: &str, body: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let expected_signature = match parse_signature_header(signature_header) {
        Some(sig) => sig,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    update_base_string(&mut mac, timestamp, body);

    mac.verify_slice(&expected_signature).is_ok()
}

/// Full request check: timestamp freshness, then signature.
///
/// The timestamp is checked first so stale replays are rejected without
/// touching the HMAC.
pub fn verify_request(
    timestamp: &str,
    body: &[u8],
    signature_header: &str,
    secret: &[u8],
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::MalformedTimestamp)?;

    if now.timestamp().abs_diff(sent_at) > MAX_CLOCK_SKEW_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    if verify_signature(timestamp, body, signature_header, secret) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
