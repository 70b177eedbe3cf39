use std::time::Duration;
use thiserror::Error;

/// Errors produced by the generation client, the orchestrator and its collaborators.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON (de)serialization failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// A backend call exhausted its retries.
    #[error("generation failed after {retries} retries: {message}")]
    GenerationFailed {
        /// Number of retries made after the initial attempt.
        retries: u32,
        /// Message of the last underlying error.
        message: String,
    },

    /// The JSON recovery cascade could not extract a value from model output.
    #[error("model output is not valid JSON; response excerpt: {excerpt}")]
    MalformedGenerationOutput {
        /// First 200 characters of the raw response.
        excerpt: String,
    },

    /// A text generation came back empty or whitespace-only.
    #[error("model returned an empty {what}")]
    EmptyGenerationOutput {
        /// What was expected, e.g. "article body".
        what: String,
    },

    /// A stage needed an intermediate result that no earlier stage produced.
    #[error("missing upstream result '{key}'")]
    MissingUpstreamResult { key: String },

    /// A pipeline stage failed; `source` carries the underlying cause.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },

    /// A stage status change that the state machine does not allow.
    #[error("stage '{stage}' cannot move from {from} to {to}")]
    InvalidTransition {
        stage: String,
        from: String,
        to: String,
    },

    /// Invalid configuration detected at build or load time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O failure in a collaborator (history file, export target).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Identifier of the failed stage, if this error came out of a stage boundary.
    pub fn stage(&self) -> Option<&str> {
        match self {
            PipelineError::StageFailed { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// The innermost error, looking through any `StageFailed` wrapper.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_failed_message_format() {
        let err = PipelineError::GenerationFailed {
            retries: 2,
            message: "connection reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "generation failed after 2 retries: connection reset"
        );
    }

    #[test]
    fn stage_failed_exposes_stage_and_cause() {
        let err = PipelineError::StageFailed {
            stage: "article".into(),
            source: Box::new(PipelineError::MissingUpstreamResult {
                key: "userProfile".into(),
            }),
        };
        assert_eq!(err.stage(), Some("article"));
        assert!(matches!(
            err.root_cause(),
            PipelineError::MissingUpstreamResult { key } if key == "userProfile"
        ));
        assert!(err.to_string().contains("Stage 'article' failed"));
    }

    #[test]
    fn empty_output_names_what_was_expected() {
        let err = PipelineError::EmptyGenerationOutput {
            what: "article body".into(),
        };
        assert_eq!(err.to_string(), "model returned an empty article body");
    }

    #[test]
    fn anyhow_converts_to_other() {
        let err: PipelineError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, PipelineError::Other(ref m) if m == "boom"));
    }
}
