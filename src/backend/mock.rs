//! Mock backend for testing without a live model.
//!
//! [`MockBackend`] returns scripted replies in order (or computes them from
//! the request), records every request it receives, and can simulate
//! failures and latency. Downstream crates can use it to write deterministic
//! tests against this crate.
//!
//! # Example
//!
//! ```
//! use content_pipeline::backend::{MockBackend, MockReply};
//!
//! let mock = MockBackend::scripted(vec![
//!     MockReply::Fail("overloaded".into()),
//!     MockReply::Text("Hello, world!".into()),
//! ]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;

/// One scripted reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Succeed with this text.
    Text(String),
    /// Fail as a transient provider error (HTTP 503) with this body.
    Fail(String),
    /// Fail with a specific HTTP status and body.
    Status(u16, String),
}

type Responder = Arc<dyn Fn(&LlmRequest) -> MockReply + Send + Sync>;
type Latency = Arc<dyn Fn(&LlmRequest) -> Duration + Send + Sync>;

/// A test backend with scripted or computed replies.
///
/// Scripted replies cycle back to the beginning once consumed.
pub struct MockBackend {
    replies: Vec<MockReply>,
    responder: Option<Responder>,
    latency: Option<Latency>,
    index: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("replies", &self.replies.len())
            .field("has_responder", &self.responder.is_some())
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MockBackend {
    /// Create a mock that succeeds with the given texts in order.
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(MockReply::Text).collect())
    }

    /// Create a mock that always returns the same text.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Create a mock from an explicit reply script.
    ///
    /// An empty script behaves like a single empty-text success.
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        let replies = if replies.is_empty() {
            vec![MockReply::Text(String::new())]
        } else {
            replies
        };
        Self {
            replies,
            responder: None,
            latency: None,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail `failures` times, then succeed with `text`.
    pub fn failing_then(failures: usize, text: impl Into<String>) -> Self {
        let mut replies: Vec<MockReply> = (0..failures)
            .map(|i| MockReply::Fail(format!("simulated outage #{}", i + 1)))
            .collect();
        replies.push(MockReply::Text(text.into()));
        Self::scripted(replies)
    }

    /// Compute each reply from the request.
    pub fn from_fn(f: impl Fn(&LlmRequest) -> MockReply + Send + Sync + 'static) -> Self {
        let mut mock = Self::scripted(Vec::new());
        mock.responder = Some(Arc::new(f));
        mock
    }

    /// Delay each reply by a request-dependent duration.
    pub fn with_latency(
        mut self,
        f: impl Fn(&LlmRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.latency = Some(Arc::new(f));
        self
    }

    /// Number of `complete` calls received so far.
    pub fn call_count(&self) -> usize {
        self.lock_requests().len()
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.lock_requests().clone()
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<LlmRequest>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, request: &LlmRequest) -> MockReply {
        if let Some(ref f) = self.responder {
            return f(request);
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        self.replies[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        self.lock_requests().push(request.clone());
        let reply = self.next_reply(request);

        if let Some(ref latency) = self.latency {
            tokio::time::sleep(latency(request)).await;
        }

        match reply {
            MockReply::Text(text) => Ok(LlmResponse {
                text,
                status: 200,
                metadata: None,
            }),
            MockReply::Fail(body) => Err(PipelineError::HttpError {
                status: 503,
                body,
                retry_after: None,
            }),
            MockReply::Status(status, body) => Err(PipelineError::HttpError {
                status,
                body,
                retry_after: None,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
