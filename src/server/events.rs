//! Slack Events API endpoint handler.
//!
//! Verifies the request signature, answers the URL verification handshake,
//! and hands `app_mention` events to the dispatcher on a tracked background
//! task. Every authentic, well-formed request is acknowledged with 200 before
//! the work runs, and the dispatch outlives the request: a client that hangs
//! up cannot cancel it halfway through.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::dispatch::DispatchOutcome;
use crate::executor::WorkExecutor;
use crate::ledger::LedgerStore;
use crate::notify::Notifier;
use crate::webhooks::{InboundMessage, ParseError, SignatureError, parse_inbound, verify_request};

/// Header carrying the request signature.
const HEADER_SIGNATURE: &str = "x-slack-signature";
/// Header carrying the signing timestamp.
const HEADER_TIMESTAMP: &str = "x-slack-request-timestamp";
/// Redelivery attempt number, present on retries only.
const HEADER_RETRY_NUM: &str = "x-slack-retry-num";
/// Why Slack redelivered (e.g. `http_timeout`).
const HEADER_RETRY_REASON: &str = "x-slack-retry-reason";

/// Errors that can occur when handling an inbound request.
#[derive(Debug, Error)]
pub enum EventsError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),
}

impl IntoResponse for EventsError {
    fn into_response(self) -> Response {
        let status = match &self {
            EventsError::MissingHeader(_) | EventsError::Signature(_) => StatusCode::UNAUTHORIZED,
            EventsError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

/// Events API handler.
///
/// # Request
///
/// - Method: POST
/// - Headers (checked when a signing secret is configured):
///   - `X-Slack-Signature`: `v0=<hex HMAC-SHA256>`
///   - `X-Slack-Request-Timestamp`: Unix seconds
/// - Body: JSON event envelope
///
/// # Response
///
/// - 200 OK: handshake answered (body is the challenge), or event accepted
/// - 400 Bad Request: invalid JSON or missing event fields
/// - 401 Unauthorized: missing or invalid signature
pub async fn events_handler<L, E, N>(
    State(app_state): State<AppState<L, E, N>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, EventsError>
where
    L: LedgerStore + Clone + 'static,
    E: WorkExecutor,
    N: Notifier + Clone + 'static,
{
    // Verify BEFORE parsing: unauthenticated bodies are never interpreted.
    if let Some(secret) = app_state.signing_secret() {
        let signature = get_header(&headers, HEADER_SIGNATURE)?;
        let timestamp = get_header(&headers, HEADER_TIMESTAMP)?;

        if let Err(e) = verify_request(timestamp, &body, signature, secret, Utc::now()) {
            warn!(error = %e, "Rejected Slack request");
            return Err(e.into());
        }
    }

    let message = parse_inbound(&body).inspect_err(|e| {
        warn!(error = %e, "Malformed Slack payload");
    })?;

    match message {
        InboundMessage::UrlVerification { challenge } => {
            info!("Answered URL verification challenge");
            Ok((StatusCode::OK, challenge).into_response())
        }
        InboundMessage::AppMention(mention) => {
            if let Some(retry_num) = headers.get(HEADER_RETRY_NUM) {
                info!(
                    event_id = %mention.event_id,
                    retry_num = ?retry_num,
                    retry_reason = ?headers.get(HEADER_RETRY_REASON),
                    "Slack redelivery"
                );
            }

            let dispatcher = app_state.dispatcher().clone();
            app_state.tasks().spawn(async move {
                match dispatcher.dispatch(&mention).await {
                    DispatchOutcome::Skipped(reason) => {
                        debug!(event_id = %mention.event_id, reason = %reason, "Mention skipped");
                    }
                    DispatchOutcome::Done { delivered } => {
                        debug!(event_id = %mention.event_id, delivered, "Mention handled");
                    }
                    DispatchOutcome::Failed(failure) => {
                        debug!(event_id = %mention.event_id, error = %failure, "Mention failed");
                    }
                }
            });
            Ok((StatusCode::OK, "OK").into_response())
        }
        InboundMessage::Ignored { kind } => {
            debug!(kind = %kind, "Ignoring Slack event");
            Ok((StatusCode::OK, "OK").into_response())
        }
    }
}

/// Extracts a header value as a string.
fn get_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, EventsError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(EventsError::MissingHeader(name))
}
