//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over chat-completion providers, translating
//! between normalized [`LlmRequest`]/[`LlmResponse`] types and a provider's
//! HTTP API. Built-in implementations: [`OpenAiBackend`] and, for tests,
//! [`MockBackend`].
//!
//! ## Architecture
//!
//! ```text
//! GenerationClient ──► LlmRequest ──► with_backoff() ──► Backend::complete() ──► LlmResponse
//!                                                               │
//!                                                   ┌───────────┴───────────┐
//!                                             OpenAiBackend            MockBackend
//!                                         /v1/chat/completions       scripted replies
//! ```

pub mod backoff;
pub mod mock;
pub mod openai;

pub use backoff::{BackoffConfig, JitterStrategy};
pub use mock::{MockBackend, MockReply};
pub use openai::OpenAiBackend;

use crate::client::GenerationConfig;
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked before each retry.
///
/// Arguments: `(retry_number, delay_before_retry, reason_for_retry)`.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(u32, Duration, &str) + Send)>;

/// A normalized chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"anthropic/claude-sonnet-4.5"`).
    pub model: String,
    /// Conversation: optional system message followed by the user message.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl LlmRequest {
    /// Build a request from a user prompt, an optional system prompt and a config.
    ///
    /// An empty system prompt is treated as absent.
    pub fn chat(user_prompt: &str, system_prompt: Option<&str>, config: &GenerationConfig) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::new(Role::System, system));
        }
        messages.push(ChatMessage::new(Role::User, user_prompt));

        Self {
            model: config.model.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Content of the last user message.
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Content of the system message, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

/// A normalized chat-completion response.
#[derive(Debug)]
pub struct LlmResponse {
    /// Content of the first choice's message.
    pub text: String,

    /// HTTP status code (for diagnostics/logging).
    pub status: u16,

    /// Provider-specific metadata (token counts, model info), stored as raw JSON.
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over chat-completion providers.
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a single completion call. No retry happens at this level.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Check whether an error should be retried under `config`.
///
/// With `retry_any_error` every failure is retried.
/// Otherwise only transport errors and [`PipelineError::HttpError`] with a
/// status in `config.retryable_statuses` are.
pub fn is_retryable(error: &PipelineError, config: &BackoffConfig) -> bool {
    match error {
        _ if config.retry_any_error => true,
        PipelineError::HttpError { status, .. } => config.retryable_statuses.contains(status),
        PipelineError::Request(_) => true,
        _ => false,
    }
}

/// Execute a backend call with retry.
///
/// Sleeps [`BackoffConfig::delay_for_attempt`] (or the provider's
/// `Retry-After`, when configured) between attempts and calls `on_retry`
/// before each retry. Returns the first successful response, or the last
/// error once retries are exhausted or the error is not retryable.
pub async fn with_backoff(
    backend: &Arc<dyn Backend>,
    client: &Client,
    base_url: &str,
    request: &LlmRequest,
    config: &BackoffConfig,
    mut on_retry: RetryCallback<'_>,
) -> Result<LlmResponse> {
    let mut last_error: Option<PipelineError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = match &last_error {
                Some(PipelineError::HttpError {
                    retry_after: Some(ra),
                    ..
                }) if config.respect_retry_after => *ra,
                _ => config.delay_for_attempt(attempt - 1),
            };

            let reason = last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();

            if let Some(ref mut cb) = on_retry {
                cb(attempt, delay, &reason);
            }

            tokio::time::sleep(delay).await;
        }

        match backend.complete(client, base_url, request).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt < config.max_retries && is_retryable(&e, config) {
                    last_error = Some(e);
                    continue;
                }
                return Err(e);
            }
        }
    }

    Err(last_error.unwrap_or(PipelineError::Other(
        "backoff loop exited unexpectedly".into(),
    )))
}
