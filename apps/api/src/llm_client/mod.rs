//! Text client for item drafts and repair calls.
//!
//! The orchestrator only sees [`TextGenerator`]; [`LlmClient`] is the one
//! implementation that talks to the Anthropic Messages API.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("no reply after {attempts} attempts")]
    Unavailable { attempts: u32 },

    #[error("model returned no text")]
    EmptyContent,
}

/// One call to the generative service.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Prompt in, one text document out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError>;
}

/// Transport retries inside one completion. Model-tier retries live in the
/// orchestrator and are counted separately.
#[derive(Debug, Clone, Copy)]
pub struct TransportRetry {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for TransportRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl TransportRetry {
    /// Delay before retry number `attempt` (1-based): base, 2x base, 4x base...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Overload and server faults are worth another try; client errors are not.
fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl MessagesResponse {
    /// Text blocks joined in order; `None` when there is no non-blank text.
    fn text(&self) -> Option<String> {
        let text: String = self
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }

    /// The draft hit the token ceiling and its JSON is probably cut short.
    fn truncated(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Prefers the API's own error message over the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}

/// Anthropic Messages API client with transport retries.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    retry: TransportRetry,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            retry: TransportRetry::default(),
        }
    }

    async fn call(&self, request: &CompletionRequest<'_>) -> Result<MessagesResponse, LlmError> {
        let body = MessagesRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system,
            messages: [Message {
                role: "user",
                content: request.prompt,
            }],
        };

        let mut last_error = None;
        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                let delay = self.retry.delay(attempt);
                warn!(
                    model = request.model,
                    attempt,
                    "Completion failed, retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if is_transient(status) {
                let message = error_message(response.text().await.unwrap_or_default());
                warn!(model = request.model, %status, "Transient API error: {message}");
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }
            if !status.is_success() {
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message: error_message(response.text().await.unwrap_or_default()),
                });
            }

            let parsed: MessagesResponse = response.json().await?;
            debug!(
                model = request.model,
                input_tokens = parsed.usage.input_tokens,
                output_tokens = parsed.usage.output_tokens,
                "Completion received"
            );
            return Ok(parsed);
        }

        Err(last_error.unwrap_or(LlmError::Unavailable {
            attempts: self.retry.attempts,
        }))
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError> {
        let response = self.call(request).await?;
        if response.truncated() {
            warn!(
                model = request.model,
                max_tokens = request.max_tokens,
                "Draft stopped at the token ceiling"
            );
        }
        response.text().ok_or(LlmError::EmptyContent)
    }
}
