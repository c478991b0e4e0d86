//! Control-surface events.
//!
//! The hosting application observes a run exclusively through these
//! events: per-task status transitions, `(completed, total)` progress, and
//! the terminal outcome. Sinks are passed explicitly to the orchestrator;
//! there is no process-wide sink.

mod sink;

pub use sink::{ChannelEvent, ChannelEventSink, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::TaskStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A per-task status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    /// The task.
    pub task: String,
    /// The stage the task belongs to.
    pub stage: usize,
    /// The status being entered.
    pub status: TaskStatus,
    /// Whether a success came from the cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
    /// Whether a success was restored from a prior run's context.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub restored: bool,
    /// Error or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Whether an error is retryable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl TaskStatusEvent {
    /// Creates a plain transition event.
    #[must_use]
    pub fn new(task: impl Into<String>, stage: usize, status: TaskStatus) -> Self {
        Self {
            task: task.into(),
            stage,
            status,
            cached: false,
            restored: false,
            message: None,
            retryable: None,
        }
    }

    /// Marks a success as served from the cache.
    #[must_use]
    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Marks a success as restored from a prior context.
    #[must_use]
    pub fn restored(mut self) -> Self {
        self.restored = true;
        self
    }

    /// Attaches a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches retryability.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}

/// Run progress as `(completed, total)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    /// Tasks resolved so far.
    pub completed: usize,
    /// Tasks in the pipeline.
    pub total: usize,
}

impl Progress {
    /// Returns the completed fraction in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Emits events for one run, stamping each payload with the run id.
#[derive(Clone)]
pub struct RunEmitter {
    run_id: Uuid,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RunEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEmitter").field("run_id", &self.run_id).finish()
    }
}

impl RunEmitter {
    /// Creates an emitter for a run.
    #[must_use]
    pub fn new(run_id: Uuid, sink: Arc<dyn EventSink>) -> Self {
        Self { run_id, sink }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Emits an arbitrary event.
    pub fn emit(&self, event_type: &str, data: serde_json::Value) {
        let mut enriched = data;
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert("run_id".to_string(), serde_json::json!(self.run_id.to_string()));
        }
        self.sink.try_emit(event_type, Some(enriched));
    }

    /// Emits a task status transition.
    pub fn task(&self, event: &TaskStatusEvent) {
        let data = serde_json::to_value(event).unwrap_or_else(|_| serde_json::json!({}));
        self.emit(event.status.event_type(), data);
    }

    /// Emits a progress update.
    pub fn progress(&self, progress: Progress) {
        self.emit(
            "pipeline.progress",
            serde_json::json!({"completed": progress.completed, "total": progress.total}),
        );
    }
}
