//! Hosted completion fallback.
//!
//! Used when no local agent is available. Every call sends the complete
//! conversation history (the endpoint keeps no session state) and performs a
//! single attempt; retry policy belongs to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::FallbackConfig;
use crate::models::conversation::ConversationTurn;
use crate::{AppError, Result};

/// Reply returned instead of an error when no API key is configured.
pub const MISSING_CREDENTIAL_GUIDANCE: &str = "No local agent was found and no API key is \
configured. Install the agent CLI, or store an API key in the system keychain (service \
`agent-conduit`, entry `anthropic_api_key`) or the ANTHROPIC_API_KEY environment variable, \
then try again.";

/// Longest error body carried into [`AppError::Api`], in characters.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<MessageParam<'a>>,
}

#[derive(Debug, Serialize)]
struct MessageParam<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Blocking-per-call client for the hosted messages endpoint.
#[derive(Debug, Clone)]
pub struct FallbackClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    max_tokens: u32,
    api_version: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
}

impl FallbackClient {
    /// Build a client from the `[fallback]` section.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be constructed.
    pub fn new(config: &FallbackConfig, system_prompt: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            api_version: config.api_version.clone(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            system_prompt,
        })
    }

    /// Whether an API key is available.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// JSON body sent for `history`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn request_body(&self, history: &[ConversationTurn]) -> Result<serde_json::Value> {
        serde_json::to_value(self.build_request(history))
            .map_err(|err| AppError::Protocol(format!("failed to encode request: {err}")))
    }

    /// Ask the endpoint for the next assistant turn.
    ///
    /// Without an API key this returns [`MISSING_CREDENTIAL_GUIDANCE`] as the
    /// assistant turn instead of failing.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`] if `history` is empty or the reply is malformed.
    /// - [`AppError::Api`] on a non-success status.
    /// - [`AppError::Timeout`] / [`AppError::Http`] on transport failure.
    pub async fn complete(&self, history: &[ConversationTurn]) -> Result<ConversationTurn> {
        let Some(api_key) = self.api_key.as_deref() else {
            info!("fallback api key missing; returning setup guidance");
            return Ok(ConversationTurn::assistant(MISSING_CREDENTIAL_GUIDANCE));
        };

        if history.is_empty() {
            return Err(AppError::Protocol("conversation history is empty".into()));
        }

        debug!(turns = history.len(), model = %self.model, "calling fallback endpoint");
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.api_version)
            .json(&self.build_request(history))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!(status = status.as_u16(), "fallback endpoint returned an error");
            return Err(AppError::Api(status.as_u16(), body));
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|err| AppError::Protocol(format!("malformed fallback response: {err}")))?;

        let text: String = reply
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        debug!(
            chars = text.len(),
            stop_reason = reply.stop_reason.as_deref().unwrap_or("none"),
            "fallback reply received"
        );
        Ok(ConversationTurn::assistant(text))
    }

    fn build_request<'a>(&'a self, history: &'a [ConversationTurn]) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: self.system_prompt.as_deref().filter(|s| !s.is_empty()),
            messages: history
                .iter()
                .map(|turn| MessageParam {
                    role: turn.role.as_str(),
                    content: &turn.content,
                })
                .collect(),
        }
    }
}
