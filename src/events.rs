//! Event system for progress reporting and lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe a pipeline run.
//! The orchestrator emits events when stages change status, complete, or
//! degrade, and the generation client emits an event before each retry.
//! Implement [`EventHandler`] to drive a progress UI or collect telemetry.

use crate::state::{StageId, StageStatus};
use serde_json::Value;
use std::sync::Arc;

/// Events emitted during a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Human-readable progress message for a stage.
    Progress {
        /// Stage the message belongs to; `None` for pipeline-level messages.
        stage: Option<StageId>,
        message: String,
    },
    /// A stage changed status.
    StageStatusChanged {
        stage: StageId,
        status: StageStatus,
        /// `current_step` index after the change.
        current_step: usize,
    },
    /// A stage finished and stored its output.
    StageCompleted {
        stage: StageId,
        /// The stage's stored result.
        output: Value,
    },
    /// A stage failed but the pipeline continues with a default value.
    Degraded {
        stage: StageId,
        /// Why the stage fell back.
        reason: String,
    },
    /// A backend call is about to be retried.
    TransportRetry {
        /// Operation description.
        name: String,
        /// Retry number (1-indexed).
        attempt: u32,
        /// Delay before this retry in milliseconds.
        delay_ms: u64,
        /// The error that triggered the retry.
        reason: String,
    },
    /// The final artifact was written.
    PipelineCompleted {
        /// Wall-clock time since the run started.
        duration_ms: u64,
    },
}

/// Handler for pipeline events.
///
/// # Example
///
/// ```
/// use content_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::Progress { message, .. } = event {
///             println!("{}", message);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for every emitted event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// ```
/// use content_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Degraded { stage, reason } = event {
///         eprintln!("{} degraded: {}", stage, reason);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// An [`EventHandler`] that stores every event, for tests and replay.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: std::sync::Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventHandler for EventRecorder {
    fn on_event(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
