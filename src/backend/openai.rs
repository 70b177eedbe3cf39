//! Backend for OpenAI-compatible chat-completion APIs.
//!
//! [`OpenAiBackend`] covers OpenAI itself and the many gateways that speak the
//! same protocol (OpenRouter, vLLM, llama.cpp server, LM Studio, Groq, ...).
//!
//! Endpoint: `{base_url}/v1/chat/completions`. The request carries
//! `{model, messages, temperature, max_tokens}`; the reply's
//! `choices[0].message.content` becomes [`LlmResponse::text`].

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use content_pipeline::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new();
/// let with_key = OpenAiBackend::new().with_api_key("sk-...");
/// assert!(with_key.has_api_key());
/// ```
#[derive(Clone)]
pub struct OpenAiBackend {
    /// Optional API key. If set, sent as `Authorization: Bearer {key}`.
    pub(crate) api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| match k.get(..6) {
                    Some(prefix) if k.len() > 6 => format!("{}***", prefix),
                    _ => "***".to_string(),
                }),
            )
            .finish()
    }
}

impl OpenAiBackend {
    /// Create a new backend without authentication.
    pub fn new() -> Self {
        Self { api_key: None }
    }

    /// Set the API key for authentication.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Returns `true` if an API key has been configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build the request body for `/v1/chat/completions`.
    fn build_body(request: &LlmRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }

    /// Parse a `Retry-After` header value as seconds.
    fn parse_retry_after(value: &str) -> Option<std::time::Duration> {
        value
            .trim()
            .parse::<u64>()
            .ok()
            .map(std::time::Duration::from_secs)
    }

    fn build_http_request(
        &self,
        client: &Client,
        url: &str,
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let mut req = client.post(url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        req
    }

    /// Pull the first choice's message content out of a response body.
    fn extract_content(json_resp: &Value) -> Option<&str> {
        json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let mut meta = serde_json::Map::new();
        for key in ["usage", "model", "id"] {
            if let Some(v) = json_resp.get(key) {
                meta.insert(key.into(), v.clone());
            }
        }
        if meta.is_empty() {
            None
        } else {
            Some(Value::Object(meta))
        }
    }
}

impl Default for OpenAiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let body = Self::build_body(request);

        tracing::debug!(url = %url, model = %request.model, "sending chat completion");

        let resp = self.build_http_request(client, &url, &body).send().await?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError {
                status,
                body: text,
                retry_after,
            });
        }

        let json_resp: Value = resp.json().await?;
        let text = Self::extract_content(&json_resp)
            .ok_or_else(|| {
                PipelineError::Other("completion response has no message content".to_string())
            })?
            .to_string();

        Ok(LlmResponse {
            text,
            status,
            metadata: Self::extract_metadata(&json_resp),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GenerationConfig;

    fn test_request() -> LlmRequest {
        let config = GenerationConfig::default()
            .with_temperature(0.5)
            .with_max_tokens(600);
        LlmRequest::chat("Write a persona", Some("You are a writer."), &config)
    }

    #[test]
    fn test_body_shape() {
        let body = OpenAiBackend::build_body(&test_request());
        assert_eq!(body["model"], "anthropic/claude-sonnet-4.5");
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["max_tokens"], 600);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are a writer.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Write a persona");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_body_without_system() {
        let req = LlmRequest::chat("hi", None, &GenerationConfig::default());
        let body = OpenAiBackend::build_body(&req);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_extract_content() {
        let resp = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(OpenAiBackend::extract_content(&resp), Some("hello"));
        assert_eq!(OpenAiBackend::extract_content(&json!({"choices": []})), None);
    }

    #[test]
    fn test_extract_metadata() {
        let resp = json!({"id": "gen-1", "model": "m", "usage": {"total_tokens": 3}, "choices": []});
        let meta = OpenAiBackend::extract_metadata(&resp).unwrap();
        assert_eq!(meta["id"], "gen-1");
        assert_eq!(meta["usage"]["total_tokens"], 3);
        assert!(OpenAiBackend::extract_metadata(&json!({})).is_none());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(
            OpenAiBackend::parse_retry_after(" 30 "),
            Some(std::time::Duration::from_secs(30))
        );
        assert_eq!(OpenAiBackend::parse_retry_after("soon"), None);
    }

    #[test]
    fn test_auth_header() {
        let backend = OpenAiBackend::new().with_api_key("sk-test-123");
        let client = Client::new();
        let req = backend
            .build_http_request(&client, "http://localhost/v1/chat/completions", &json!({}))
            .build()
            .unwrap();
        assert_eq!(
            req.headers().get("Authorization").unwrap().to_str().unwrap(),
            "Bearer sk-test-123"
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let backend = OpenAiBackend::new().with_api_key("sk-abcdefghijklmnop");
        let debug = format!("{:?}", backend);
        assert!(debug.contains("sk-abc***"));
        assert!(!debug.contains("ghijklmnop"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_request_error() {
        let backend = OpenAiBackend::new();
        let result = backend
            .complete(&Client::new(), "http://127.0.0.1:9", &test_request())
            .await;
        assert!(matches!(result, Err(PipelineError::Request(_))));
    }
}
