//! # Content Pipeline
//!
//! A multi-stage article generator driven by a chat-completion model.
//!
//! A run walks a fixed sequence of dependent generation calls (persona,
//! knowledge base, reader profile, empathy points, article, titles,
//! compliance review, formatting), each fed from earlier results, and
//! assembles a finished article at the end.
//!
//! ## Core Concepts
//!
//! - **[`GenerationClient`]**: calls the backend with fixed-delay retry,
//!   recovers JSON from chatty model output, fans out independent prompts.
//! - **[`PipelineOrchestrator`]**: the stage machine. Renders each stage's
//!   prompt, calls the client, stores the result, reports progress.
//! - **[`PipelineState`]**: stage statuses, parameters, intermediate results
//!   and the final artifact for one run.
//! - **[`PromptLibrary`]**: one validated [`PromptSpec`] per generation call.
//! - **[`template`]**: `{{name}}` substitution fed by dotted paths into the state.
//! - **[`output_parser`]**: the JSON recovery cascade.
//!
//! ## Quick Start
//!
//! ```no_run
//! use content_pipeline::{GenerationClientBuilder, PipelineOrchestrator, PipelineParameters};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GenerationClientBuilder::from_env().build()?;
//!     let params = PipelineParameters::new()
//!         .with("targetAudience", "parents of primary school kids")
//!         .with("feature", "ergonomic school bag")
//!         .with("articleLength", 400);
//!
//!     let mut pipeline = PipelineOrchestrator::new(client, params);
//!     let article = pipeline.run().await?;
//!     println!("{}\n\n{}", article.title, article.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without a model
//!
//! [`MockBackend`] returns scripted or computed replies and records every
//! request, so whole runs can be tested offline:
//!
//! ```
//! use content_pipeline::{GenerationClient, MockBackend};
//! use std::sync::Arc;
//!
//! let client = GenerationClient::builder("http://unused")
//!     .backend(Arc::new(MockBackend::fixed("{\"ok\": true}")))
//!     .build()
//!     .unwrap();
//! ```

pub mod backend;
pub mod client;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod export;
pub mod history;
pub mod orchestrator;
pub mod output_parser;
pub mod prompts;
pub mod state;
pub mod template;
pub mod typewriter;

pub use backend::{Backend, BackoffConfig, MockBackend, MockReply, OpenAiBackend};
pub use client::{
    BatchOutcome, BatchRequest, CallStatus, FailureKind, GenerationClient,
    GenerationClientBuilder, GenerationConfig, GenerationOutcome,
};
pub use diagnostics::RecoveryDiagnostics;
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, EventRecorder, FnEventHandler};
pub use export::{ArticleExporter, HtmlExporter};
pub use history::{
    FallbackHistoryStore, HistoryRecord, HistoryStore, JsonFileHistoryStore, MemoryHistoryStore,
};
pub use orchestrator::PipelineOrchestrator;
pub use output_parser::{recover_json, recover_json_as, CandidateOrder, RecoveryOptions};
pub use prompts::{PromptLibrary, PromptSpec};
pub use state::{
    FinalArtifact, IntermediateResults, PipelineParameters, PipelineState, StageId, StageStatus,
};
pub use typewriter::{simulate_typewriter, TypewriterHandle};
