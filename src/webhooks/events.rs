//! Slack Events API payloads.
//!
//! Only the parts of the envelope the bot acts on are modelled. Unknown fields
//! are ignored, and unknown envelope or event types parse to
//! [`InboundMessage::Ignored`] rather than an error.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{ChannelId, EventId, UserId};

/// Error type for inbound payload parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The body is not JSON, or a field has the wrong JSON type.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required for the message type is absent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// A parsed inbound Slack message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Endpoint ownership handshake. Answered with the challenge, never
    /// touches the ledger.
    UrlVerification { challenge: String },

    /// The bot was mentioned in a channel.
    AppMention(AppMention),

    /// Anything we do not act on. `kind` is the event type when present,
    /// otherwise the envelope type.
    Ignored { kind: String },
}

/// An `app_mention` event delivered inside an `event_callback` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMention {
    /// Envelope `event_id`. Stable across Slack's redeliveries, so this is the
    /// deduplication key.
    pub event_id: EventId,
    pub channel: ChannelId,
    /// Raw message text, still containing the `<@BOT>` token.
    pub text: String,
    pub user: Option<UserId>,
    pub client_msg_id: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    event: Option<InnerEvent>,
}

#[derive(Deserialize)]
struct InnerEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    client_msg_id: Option<String>,
}

/// Parses a raw Events API request body.
///
/// # Examples
///
/// ```
/// use event_guard::webhooks::{InboundMessage, parse_inbound};
///
/// let body = br#"{"type":"url_verification","challenge":"3eZbrw1a","token":"x"}"#;
/// assert_eq!(
///     parse_inbound(body).unwrap(),
///     InboundMessage::UrlVerification { challenge: "3eZbrw1a".to_string() }
/// );
/// ```
pub fn parse_inbound(payload: &[u8]) -> Result<InboundMessage, ParseError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;

    match envelope.kind.as_str() {
        "url_verification" => {
            let challenge = envelope
                .challenge
                .ok_or(ParseError::MissingField("challenge"))?;
            Ok(InboundMessage::UrlVerification { challenge })
        }
        "event_callback" => {
            let event = envelope.event.ok_or(ParseError::MissingField("event"))?;
            if event.kind != "app_mention" {
                return Ok(InboundMessage::Ignored { kind: event.kind });
            }

            let event_id = envelope
                .event_id
                .filter(|id| !id.is_empty())
                .ok_or(ParseError::MissingField("event_id"))?;
            let channel = event.channel.ok_or(ParseError::MissingField("channel"))?;
            let text = event.text.ok_or(ParseError::MissingField("text"))?;

            Ok(InboundMessage::AppMention(AppMention {
                event_id: EventId::new(event_id),
                channel: ChannelId::new(channel),
                text,
                user: event.user.map(UserId::new),
                client_msg_id: event.client_msg_id,
            }))
        }
        other => Ok(InboundMessage::Ignored {
            kind: other.to_string(),
        }),
    }
}

/// Removes every `<@BOT>` token from `text` and trims the result.
///
/// Without a configured bot user id the text is only trimmed.
pub fn strip_mention(text: &str, bot_user_id: Option<&UserId>) -> String {
    match bot_user_id {
        Some(bot) => text.replace(&bot.mention_token(), "").trim().to_string(),
        None => text.trim().to_string(),
    }
}
