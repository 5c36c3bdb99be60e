//! HTTP client for the reasoning service.
//!
//! The service owns the dataset and the language model; we send it the
//! question and get back `{"output": "<answer>"}`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info_span};

use super::{ExecutorError, WorkExecutor, WorkRequest, WorkResponse};
use crate::types::{ChannelId, EventId, UserId};

/// Longest error body kept in [`ExecutorError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Configuration for [`HttpExecutor`].
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// URL the request is POSTed to.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
    pub user_agent: String,
}

impl HttpExecutorConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HttpExecutorConfig {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(120),
            user_agent: concat!("event-guard/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Serialize)]
struct ReasoningRequest<'a> {
    event_id: &'a EventId,
    channel: &'a ChannelId,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a UserId>,
}

#[derive(Deserialize)]
struct ReasoningResponse {
    output: Option<String>,
}

/// A [`WorkExecutor`] that delegates to a remote reasoning service.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExecutor {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::Transport` if the client cannot be constructed.
    pub fn new(config: HttpExecutorConfig) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()?;

        Ok(HttpExecutor {
            client,
            endpoint: config.endpoint,
        })
    }

    async fn call(&self, request: &WorkRequest) -> Result<WorkResponse, ExecutorError> {
        let body = ReasoningRequest {
            event_id: &request.event_id,
            channel: &request.channel,
            input: &request.text,
            user: request.user.as_ref(),
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
            return Err(ExecutorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ReasoningResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::MalformedResponse(e.to_string()))?;

        match parsed.output {
            Some(text) => {
                debug!(reply_len = text.len(), "Reasoning service replied");
                Ok(WorkResponse { text })
            }
            None => Err(ExecutorError::MalformedResponse(
                "missing `output` field".to_string(),
            )),
        }
    }
}

impl WorkExecutor for HttpExecutor {
    async fn run(&self, request: WorkRequest) -> Result<WorkResponse, ExecutorError> {
        let span = info_span!("reasoning_request", event_id = %request.event_id);
        self.call(&request).instrument(span).await
    }
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
