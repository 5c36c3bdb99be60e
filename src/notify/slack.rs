//! Slack `chat.postMessage` notifier.
//!
//! Slack answers most API failures with HTTP 200 and `{"ok": false, "error": ...}`,
//! so the body is checked as well as the status.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Notifier, NotifyError};
use crate::types::ChannelId;

/// Production Slack Web API base URL.
pub const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Serialize)]
struct PostMessage<'a> {
    channel: &'a ChannelId,
    text: &'a str,
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts replies into Slack channels with a bot token.
#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl SlackNotifier {
    /// Creates a notifier against `api_base` (normally [`SLACK_API_BASE`]).
    pub fn new(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(SlackNotifier {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    fn post_message_url(&self) -> String {
        format!("{}/chat.postMessage", self.api_base)
    }
}

impl std::fmt::Debug for SlackNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The bot token stays out of logs.
        f.debug_struct("SlackNotifier")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl Notifier for SlackNotifier {
    async fn deliver(&self, channel: &ChannelId, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.post_message_url())
            .bearer_auth(&self.bot_token)
            .json(&PostMessage { channel, text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        let body: PostMessageResponse = response.json().await?;
        if !body.ok {
            return Err(NotifyError::Rejected(
                body.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        debug!(channel = %channel, "Posted reply to Slack");
        Ok(())
    }
}
