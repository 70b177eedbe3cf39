//! Generation client: resilient chat-completion calls.
//!
//! [`GenerationClient`] wraps a [`Backend`] with fixed-delay retry, JSON
//! recovery, concurrent fan-out, and an observable [`CallStatus`] that a UI
//! can poll while a call is outstanding.

use crate::{
    backend::{self, Backend, BackoffConfig, LlmRequest, OpenAiBackend},
    error::Result,
    events::{emit, Event, EventHandler},
    output_parser::{error::truncate, recover_json_with, RecoveryOptions},
    PipelineError,
};
use futures::future::join_all;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Model used when a prompt does not name one.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// Base URL used by [`GenerationClientBuilder::from_env`] when none is set.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api";

/// Instruction appended to every prompt sent through [`GenerationClient::generate_json`].
pub const JSON_ONLY_INSTRUCTION: &str = "**Important**: respond with the JSON object only. \
Do not wrap it in ```json``` fences and do not add any explanation before or after it.";

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Model identifier sent to the backend.
    pub model: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl GenerationConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Observable state of the client's most recent call.
///
/// Reset at the start of every [`GenerationClient::generate_text`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStatus {
    /// A call is currently outstanding.
    pub in_flight: bool,
    /// Message of the most recent failed attempt.
    pub last_error: Option<String>,
    /// Failed attempts recorded in the current call.
    pub attempts: u32,
}

/// Why a fan-out item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The backend call exhausted its retries.
    GenerationFailed,
    /// The response could not be recovered as JSON.
    MalformedOutput,
    /// Anything else.
    Other,
}

impl FailureKind {
    fn of(error: &PipelineError) -> Self {
        match error {
            PipelineError::GenerationFailed { .. } => FailureKind::GenerationFailed,
            PipelineError::MalformedGenerationOutput { .. } => FailureKind::MalformedOutput,
            _ => FailureKind::Other,
        }
    }
}

/// Result of a single backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Success(String),
    Failure {
        kind: FailureKind,
        message: String,
        /// Backend attempts made before giving up.
        attempts: u32,
    },
}

/// One request in a [`GenerationClient::generate_batch`] fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub user_prompt: String,
    pub system_prompt: Option<String>,
    pub config: GenerationConfig,
}

impl BatchRequest {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            system_prompt: None,
            config: GenerationConfig::default(),
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }
}

/// Settled result of one fan-out item. `index` is the item's position in the
/// caller's request list.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub index: usize,
    pub outcome: GenerationOutcome,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, GenerationOutcome::Success(_))
    }

    /// Generated text, for successful items.
    pub fn data(&self) -> Option<&str> {
        match &self.outcome {
            GenerationOutcome::Success(text) => Some(text),
            GenerationOutcome::Failure { .. } => None,
        }
    }

    /// Error message, for failed items.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            GenerationOutcome::Success(_) => None,
            GenerationOutcome::Failure { message, .. } => Some(message),
        }
    }
}

/// Client for a chat-completion backend with retry and JSON recovery.
///
/// # Example
///
/// ```
/// use content_pipeline::{GenerationClient, MockBackend};
/// use std::sync::Arc;
///
/// let client = GenerationClient::builder("http://unused")
///     .backend(Arc::new(MockBackend::fixed("hello")))
///     .build()
///     .unwrap();
/// assert!(!client.status().in_flight);
/// ```
pub struct GenerationClient {
    http: Client,
    base_url: String,
    backend: Arc<dyn Backend>,
    backoff: BackoffConfig,
    recovery: RecoveryOptions,
    event_handler: Option<Arc<dyn EventHandler>>,
    status: Arc<Mutex<CallStatus>>,
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("backoff", &self.backoff)
            .field("recovery", &self.recovery)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

impl GenerationClient {
    /// Create a new builder.
    pub fn builder(base_url: impl Into<String>) -> GenerationClientBuilder {
        GenerationClientBuilder::new(base_url)
    }

    /// Snapshot of the current call status.
    pub fn status(&self) -> CallStatus {
        self.lock_status().clone()
    }

    /// The configured event handler, if any.
    pub fn event_handler(&self) -> Option<&Arc<dyn EventHandler>> {
        self.event_handler.as_ref()
    }

    fn lock_status(&self) -> MutexGuard<'_, CallStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Generate text for a user prompt, with an optional system prompt.
    ///
    /// Retries per the configured [`BackoffConfig`] (by default 2 retries,
    /// 1 second apart). Once retries are exhausted the error is
    /// [`PipelineError::GenerationFailed`] carrying the retry count and the
    /// last underlying message.
    pub async fn generate_text(
        &self,
        user_prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<String> {
        *self.lock_status() = CallStatus {
            in_flight: true,
            ..CallStatus::default()
        };

        let request = LlmRequest::chat(user_prompt, system_prompt, config);
        let (result, failures) = self.call_with_retry(&request, true).await;

        let mut status = self.lock_status();
        status.in_flight = false;
        status.attempts = failures;
        if let Err(ref e) = result {
            status.last_error = Some(e.to_string());
        }
        result
    }

    /// Generate JSON: appends [`JSON_ONLY_INSTRUCTION`] to the prompt, calls
    /// [`generate_text`](Self::generate_text), then runs the JSON recovery
    /// cascade on the reply.
    pub async fn generate_json(
        &self,
        user_prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<Value> {
        let prompt = format!("{}\n\n{}", user_prompt, JSON_ONLY_INSTRUCTION);
        let text = self.generate_text(&prompt, system_prompt, config).await?;
        self.recover(&text)
    }

    /// Like [`generate_json`](Self::generate_json), deserializing into `T`.
    pub async fn generate_json_as<T: DeserializeOwned>(
        &self,
        user_prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<T> {
        let value = self.generate_json(user_prompt, system_prompt, config).await?;
        let excerpt = truncate(&value.to_string(), 200);
        serde_json::from_value(value)
            .map_err(|_| PipelineError::MalformedGenerationOutput { excerpt })
    }

    /// Issue every request concurrently and wait for all of them to settle.
    ///
    /// Never fails as a whole: each item resolves to its own
    /// [`GenerationOutcome`], and the returned list is in request order
    /// regardless of completion order.
    pub async fn generate_batch(&self, requests: Vec<BatchRequest>) -> Vec<BatchOutcome> {
        self.lock_status().in_flight = true;

        let calls = requests.into_iter().enumerate().map(|(index, req)| async move {
            let request =
                LlmRequest::chat(&req.user_prompt, req.system_prompt.as_deref(), &req.config);
            let (result, failures) = self.call_with_retry(&request, false).await;
            let outcome = match result {
                Ok(text) => GenerationOutcome::Success(text),
                Err(e) => GenerationOutcome::Failure {
                    kind: FailureKind::of(&e),
                    message: e.to_string(),
                    attempts: failures,
                },
            };
            BatchOutcome { index, outcome }
        });
        let outcomes = join_all(calls).await;

        let mut status = self.lock_status();
        status.in_flight = false;
        if let Some(message) = outcomes.iter().rev().find_map(|o| o.error()) {
            status.last_error = Some(message.to_string());
        }
        outcomes
    }

    /// Run the JSON recovery cascade, mapping failure to
    /// [`PipelineError::MalformedGenerationOutput`].
    fn recover(&self, text: &str) -> Result<Value> {
        match recover_json_with(text, &self.recovery) {
            Ok((value, _diag)) => Ok(value),
            Err(e) => {
                tracing::error!(error = %e, "could not recover JSON from model output");
                Err(PipelineError::MalformedGenerationOutput {
                    excerpt: truncate(text, 200),
                })
            }
        }
    }

    /// One logical call: backend attempts with retry.
    ///
    /// Returns the result and the number of failed attempts. When
    /// `track_status` is set, each failure is mirrored into [`CallStatus`].
    async fn call_with_retry(&self, request: &LlmRequest, track_status: bool) -> (Result<String>, u32) {
        let mut retries: u32 = 0;
        let status = self.status.clone();
        let event_handler = self.event_handler.clone();
        let model = request.model.clone();

        let mut on_retry = |attempt: u32, delay: Duration, reason: &str| {
            retries = attempt;
            tracing::warn!(
                model = %model,
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason,
                "backend call failed, retrying"
            );
            if track_status {
                let mut s = status.lock().unwrap_or_else(|e| e.into_inner());
                s.attempts = attempt;
                s.last_error = Some(reason.to_string());
            }
            emit(
                &event_handler,
                Event::TransportRetry {
                    name: format!("generate:{}", model),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    reason: reason.to_string(),
                },
            );
        };

        let result = backend::with_backoff(
            &self.backend,
            &self.http,
            &self.base_url,
            request,
            &self.backoff,
            Some(&mut on_retry),
        )
        .await;

        match result {
            Ok(response) => (Ok(response.text), retries),
            Err(e) => {
                tracing::error!(retries, error = %e, "backend call exhausted retries");
                (
                    Err(PipelineError::GenerationFailed {
                        retries,
                        message: e.to_string(),
                    }),
                    retries + 1,
                )
            }
        }
    }
}

/// Builder for [`GenerationClient`].
pub struct GenerationClientBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    api_key: Option<String>,
    backoff: Option<BackoffConfig>,
    recovery: RecoveryOptions,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl GenerationClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: None,
            base_url: base_url.into(),
            backend: None,
            api_key: None,
            backoff: None,
            recovery: RecoveryOptions::default(),
            event_handler: None,
            timeout: None,
        }
    }

    /// Start from the environment.
    ///
    /// Reads `CONTENT_PIPELINE_BASE_URL` (default [`DEFAULT_BASE_URL`]) and
    /// `CONTENT_PIPELINE_API_KEY`.
    pub fn from_env() -> Self {
        let base_url = std::env::var("CONTENT_PIPELINE_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut builder = Self::new(base_url);
        builder.api_key = std::env::var("CONTENT_PIPELINE_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());
        builder
    }

    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the backend. Default: [`OpenAiBackend`] (with the API key, if any).
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// API key for the default [`OpenAiBackend`]. Ignored when a custom backend is set.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the retry policy. Default: [`BackoffConfig::fixed()`].
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Some(config);
        self
    }

    /// Set the JSON recovery options.
    pub fn recovery_options(mut self, options: RecoveryOptions) -> Self {
        self.recovery = options;
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the request timeout. Default: 120 seconds.
    ///
    /// Ignored when a custom `Client` is provided via `.client()`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<GenerationClient> {
        let http = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(self.timeout.unwrap_or(Duration::from_secs(120)))
                .build()?,
        };
        let backend = self.backend.unwrap_or_else(|| {
            let openai = match self.api_key {
                Some(key) => OpenAiBackend::new().with_api_key(key),
                None => OpenAiBackend::new(),
            };
            Arc::new(openai)
        });

        Ok(GenerationClient {
            http,
            base_url: normalize_base_url(&self.base_url),
            backend,
            backoff: self.backoff.unwrap_or_default(),
            recovery: self.recovery,
            event_handler: self.event_handler,
            status: Arc::new(Mutex::new(CallStatus::default())),
        })
    }
}

/// Strip provider path suffixes from a base URL so the backend can append its own.
/// e.g. "https://openrouter.ai/api/v1" -> "https://openrouter.ai/api"
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in ["/v1/chat/completions", "/v1/chat", "/v1"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::events::EventRecorder;
    use serde_json::json;

    fn client_with(mock: Arc<MockBackend>) -> GenerationClient {
        GenerationClient::builder("http://unused")
            .backend(mock)
            .build()
            .unwrap()
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://openrouter.ai/api/v1"), "https://openrouter.ai/api");
        assert_eq!(normalize_base_url("https://openrouter.ai/api/"), "https://openrouter.ai/api");
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com"
        );
    }

    #[test]
    fn test_generation_config_defaults() {
        let config = GenerationConfig::default();
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_tokens, 2000);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_generation_config_deserialize_partial() {
        let config: GenerationConfig =
            serde_json::from_value(json!({"temperature": 0.9, "maxTokens": 1500})).unwrap();
        assert_eq!(config.temperature, 0.9);
        assert_eq!(config.max_tokens, 1500);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_recovers_within_two_failures() {
        for k in 0..=2usize {
            let mock = Arc::new(MockBackend::failing_then(k, "done"));
            let client = client_with(mock.clone());
            let text = client
                .generate_text("prompt", None, &GenerationConfig::default())
                .await
                .unwrap();
            assert_eq!(text, "done");
            assert_eq!(mock.call_count(), k + 1);
            let status = client.status();
            assert_eq!(status.attempts as usize, k);
            assert!(!status.in_flight);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_fails_after_three_attempts() {
        let mock = Arc::new(MockBackend::failing_then(3, "too late"));
        let client = client_with(mock.clone());

        let err = client
            .generate_text("prompt", Some("system"), &GenerationConfig::default())
            .await
            .unwrap_err();

        assert_eq!(mock.call_count(), 3);
        match err {
            PipelineError::GenerationFailed { retries, ref message } => {
                assert_eq!(retries, 2);
                assert!(message.contains("simulated outage #3"));
            }
            ref other => panic!("expected GenerationFailed, got {:?}", other),
        }
        assert!(err.to_string().starts_with("generation failed after 2 retries: "));

        let status = client.status();
        assert_eq!(status.attempts, 3);
        assert!(status.last_error.is_some());
        assert!(!status.in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_one_second_between_attempts() {
        let mock = Arc::new(MockBackend::failing_then(2, "ok"));
        let client = client_with(mock);
        let started = tokio::time::Instant::now();
        client
            .generate_text("prompt", None, &GenerationConfig::default())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_resets_between_calls() {
        let mock = Arc::new(MockBackend::scripted(vec![
            MockReply::Fail("first".into()),
            MockReply::Text("a".into()),
            MockReply::Text("b".into()),
        ]));
        let client = client_with(mock);
        let config = GenerationConfig::default();

        client.generate_text("1", None, &config).await.unwrap();
        assert_eq!(client.status().attempts, 1);
        assert!(client.status().last_error.is_some());

        client.generate_text("2", None, &config).await.unwrap();
        assert_eq!(client.status(), CallStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_emits_events() {
        let recorder = Arc::new(EventRecorder::new());
        let client = GenerationClient::builder("http://unused")
            .backend(Arc::new(MockBackend::failing_then(1, "ok")))
            .event_handler(recorder.clone())
            .build()
            .unwrap();

        client
            .generate_text("p", None, &GenerationConfig::default())
            .await
            .unwrap();

        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Event::TransportRetry { attempt: 1, delay_ms: 1000, .. }
        ));
    }

    #[tokio::test]
    async fn test_generate_json_appends_instruction_and_recovers() {
        let mock = Arc::new(MockBackend::fixed(
            "Here it is:\n```json\n{\"keywords\": [\"lightweight\", \"ergonomic\"]}\n```",
        ));
        let client = client_with(mock.clone());

        let value = client
            .generate_json("List keywords", Some("sys"), &GenerationConfig::default())
            .await
            .unwrap();

        assert_eq!(value, json!({"keywords": ["lightweight", "ergonomic"]}));
        let sent = mock.requests();
        assert!(sent[0].user_prompt().starts_with("List keywords\n\n"));
        assert!(sent[0].user_prompt().ends_with(JSON_ONLY_INSTRUCTION));
        assert_eq!(sent[0].system_prompt(), Some("sys"));
    }

    #[tokio::test]
    async fn test_generate_json_malformed() {
        let raw = "Sorry, I can't produce that.";
        let client = client_with(Arc::new(MockBackend::fixed(raw)));

        let err = client
            .generate_json("x", None, &GenerationConfig::default())
            .await
            .unwrap_err();

        match err {
            PipelineError::MalformedGenerationOutput { excerpt } => assert_eq!(excerpt, raw),
            other => panic!("expected MalformedGenerationOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_json_as_typed() {
        #[derive(Debug, Deserialize)]
        struct Titles {
            titles: Vec<String>,
        }
        let client = client_with(Arc::new(MockBackend::fixed(r#"{"titles": ["a", "b"]}"#)));
        let titles: Titles = client
            .generate_json_as("x", None, &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(titles.titles, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_preserves_order_and_isolates_failure() {
        // p0 finishes last, p2 first; p1 always fails.
        let mock = MockBackend::from_fn(|req| match req.user_prompt() {
            "p1" => MockReply::Fail("p1 is broken".into()),
            other => MockReply::Text(format!("{} ok", other)),
        })
        .with_latency(|req| match req.user_prompt() {
            "p0" => Duration::from_millis(300),
            "p1" => Duration::from_millis(200),
            _ => Duration::from_millis(100),
        });
        let mock = Arc::new(mock);
        let client = client_with(mock.clone());

        let outcomes = client
            .generate_batch(vec![
                BatchRequest::new("p0"),
                BatchRequest::new("p1"),
                BatchRequest::new("p2").with_system("sys"),
            ])
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            outcomes.iter().map(|o| o.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(outcomes[0].data(), Some("p0 ok"));
        assert!(!outcomes[1].is_success());
        assert!(outcomes[1].error().unwrap().contains("p1 is broken"));
        assert!(matches!(
            outcomes[1].outcome,
            GenerationOutcome::Failure {
                kind: FailureKind::GenerationFailed,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(outcomes[2].data(), Some("p2 ok"));
        // p1 retried twice, the others once each
        assert_eq!(mock.call_count(), 5);
        assert!(!client.status().in_flight);
    }

    #[tokio::test]
    async fn test_batch_empty() {
        let client = client_with(Arc::new(MockBackend::fixed("x")));
        assert!(client.generate_batch(Vec::new()).await.is_empty());
    }
}
