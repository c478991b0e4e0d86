//! Error types for the agentflow engine.
//!
//! The taxonomy separates faults that make a pipeline unusable
//! (configuration errors, surfaced before any task runs) from faults of a
//! single task (wrapped into [`TaskExecutionError`]) and from the
//! quality-gate outcome, which is a structured control-flow result rather
//! than a fault.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Shorthand for results whose failure is the terminal pipeline error.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// The terminal error of a pipeline run.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The pipeline definition or configuration is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A task was about to start without a recorded dependency output.
    #[error("{0}")]
    UnmetDependency(#[from] UnmetDependencyError),

    /// A task failed to produce a valid output.
    #[error("{0}")]
    TaskExecution(#[from] TaskExecutionError),

    /// A quality gate rejected the accumulated artifacts.
    #[error("{0}")]
    QualityGate(#[from] QualityGateFailure),

    /// The durable key-value store failed.
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Returns true if re-invoking the run may succeed without changes.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TaskExecution(err) => err.retryable,
            Self::Store(StoreError::Io(_)) => true,
            _ => false,
        }
    }

    /// Returns the task the failure is attributed to, if any.
    #[must_use]
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::UnmetDependency(err) => Some(&err.task),
            Self::TaskExecution(err) => Some(&err.task),
            Self::QualityGate(err) => Some(&err.task),
            Self::Configuration(_) | Self::Store(_) => None,
        }
    }

    /// Returns the stage the failure happened in, if any.
    #[must_use]
    pub fn stage(&self) -> Option<usize> {
        match self {
            Self::TaskExecution(err) => Some(err.stage),
            Self::QualityGate(err) => Some(err.stage),
            _ => None,
        }
    }

    /// Returns the quality gate failure payload, if this is one.
    #[must_use]
    pub fn as_quality_gate(&self) -> Option<&QualityGateFailure> {
        match self {
            Self::QualityGate(failure) => Some(failure),
            _ => None,
        }
    }

    /// Converts to a JSON payload suitable for events and reports.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "type": self.type_name(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        if let serde_json::Value::Object(ref mut map) = payload {
            if let Some(task) = self.task() {
                map.insert("task".to_string(), serde_json::json!(task));
            }
            if let Some(stage) = self.stage() {
                map.insert("stage".to_string(), serde_json::json!(stage));
            }
            if let Self::QualityGate(failure) = self {
                map.insert("gate_number".to_string(), serde_json::json!(failure.gate_number));
                map.insert(
                    "issues_to_address".to_string(),
                    serde_json::json!(failure.issues_to_address),
                );
            }
        }
        payload
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::UnmetDependency(_) => "UnmetDependencyError",
            Self::TaskExecution(_) => "TaskExecutionError",
            Self::QualityGate(_) => "QualityGateFailure",
            Self::Store(_) => "StoreError",
        }
    }
}

/// Diagnostic metadata attached to configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONFIG-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when the pipeline definition or engine configuration is invalid.
///
/// Always fatal and always raised before any task runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The tasks involved in the error.
    pub tasks: Vec<String>,
    /// Optional diagnostic info.
    pub info: Option<ErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tasks: Vec::new(),
            info: None,
        }
    }

    /// Sets the tasks involved.
    #[must_use]
    pub fn with_tasks(mut self, tasks: Vec<String>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_info(mut self, info: ErrorInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Returns the error code, if diagnostic info is attached.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.info.as_ref().map(|info| info.code.as_str())
    }

    /// Shorthand for an error with a code and a single task.
    pub(crate) fn coded(code: &str, task: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut info = ErrorInfo::new(code, message.clone());
        if let Some(hint) = ErrorSuggestions::get(code) {
            info = info.with_fix_hint(hint);
        }
        Self::new(message).with_tasks(vec![task.into()]).with_info(info)
    }
}

/// Error raised when a cycle is detected in the task graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of tasks forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for ConfigurationError {
    fn from(err: CycleDetectedError) -> Self {
        let info = ErrorInfo::new(
            "CONFIG-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", err.cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            message: err.to_string(),
            tasks: err.cycle_path,
            info: Some(info),
        }
    }
}

/// Error raised when a task is about to run without its dependency's output.
///
/// The compiler's stage assignment makes this unreachable for valid
/// pipelines; it guards against a corrupted resume context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unmet dependency: task '{task}' requires output of '{dependency}' which has not completed")]
pub struct UnmetDependencyError {
    /// The task about to run.
    pub task: String,
    /// The dependency without a recorded output.
    pub dependency: String,
}

impl UnmetDependencyError {
    /// Creates a new unmet dependency error.
    #[must_use]
    pub fn new(task: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            dependency: dependency.into(),
        }
    }
}

/// The cause category of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The completion service call failed.
    Transport,
    /// The output was rejected by the task's validator.
    Validation,
    /// The circuit breaker rejected the call.
    CircuitOpen,
    /// A dependency output was missing.
    UnmetDependency,
    /// The task panicked.
    Panicked,
    /// Any other failure.
    Other,
}

/// Error returned by an agent's `run`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    /// Human readable cause.
    pub message: String,
    /// Cause category.
    pub kind: TaskErrorKind,
    /// Whether re-running may succeed.
    pub retryable: bool,
}

impl TaskError {
    /// Creates a task error, deriving retryability from the message.
    #[must_use]
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let retryable = match kind {
            TaskErrorKind::CircuitOpen => true,
            TaskErrorKind::Validation | TaskErrorKind::UnmetDependency => false,
            _ => is_retryable_message(&message),
        };
        Self {
            message,
            kind,
            retryable,
        }
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Transport, message)
    }

    /// Creates a validation error listing the violations.
    #[must_use]
    pub fn validation(violations: &[String]) -> Self {
        Self::new(
            TaskErrorKind::Validation,
            format!("Output failed validation: {}", violations.join("; ")),
        )
    }

    /// Creates an error of kind `Other`.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Other, message)
    }

    /// Overrides the derived retryability.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::other(format!("{err:#}"))
    }
}

/// A task failure annotated with where it happened.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Task '{task}' failed in stage {stage}: {message}")]
pub struct TaskExecutionError {
    /// The failing task.
    pub task: String,
    /// The stage the task belongs to.
    pub stage: usize,
    /// Failure message.
    pub message: String,
    /// Cause category.
    pub kind: TaskErrorKind,
    /// Whether re-running may succeed.
    pub retryable: bool,
}

impl TaskExecutionError {
    /// Wraps an agent error with its task and stage.
    #[must_use]
    pub fn from_task_error(task: impl Into<String>, stage: usize, err: TaskError) -> Self {
        Self {
            task: task.into(),
            stage,
            message: err.message,
            kind: err.kind,
            retryable: err.retryable,
        }
    }
}

/// Error returned while the circuit breaker is open.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Circuit breaker is open; retry after {}ms", retry_after.as_millis())]
pub struct CircuitOpenError {
    /// Remaining cooldown before a trial call is admitted.
    pub retry_after: Duration,
}

impl CircuitOpenError {
    /// Circuit-open rejections clear once the breaker cools down.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        true
    }
}

/// A quality gate rejected the accumulated artifacts.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("Quality gate {gate_number} ('{task}') failed with score {score}: {}", issues_to_address.join("; "))]
pub struct QualityGateFailure {
    /// The gate's number in the pipeline.
    pub gate_number: u32,
    /// The gate task name.
    pub task: String,
    /// The stage of the gate.
    pub stage: usize,
    /// The gate's score.
    pub score: f64,
    /// Issues the revision run must address.
    pub issues_to_address: Vec<String>,
    /// The rejected artifact of the task the revision will rework.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_output: Option<serde_json::Value>,
}

/// Errors from the durable key-value store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("Store I/O error: {0}")]
    Io(String),
    /// A stored value could not be encoded or decoded.
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[allow(clippy::expect_used)]
static RETRYABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)time[d ]?\s?out|unavailable|\b503\b|rate[ _-]?limit|too many requests|\b429\b|overloaded|connection (reset|refused)",
    )
    .expect("retryable pattern is a valid regex")
});

/// Returns true if a failure message describes a transient condition.
///
/// Timeouts, service-unavailable and rate-limit failures are retryable;
/// everything else is not.
#[must_use]
pub fn is_retryable_message(message: &str) -> bool {
    RETRYABLE_PATTERN.is_match(message)
}

/// Provides default suggestions for configuration error codes.
pub struct ErrorSuggestions;

impl ErrorSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONFIG-CYCLE" => Some(
                "Check task dependencies for circular references. \
                 Integrators should depend on generators, never the reverse.",
            ),
            "CONFIG-MISSING_DEP" => Some(
                "Ensure every dependency names a task declared in the pipeline. \
                 Check for typos in task names.",
            ),
            "CONFIG-DUPLICATE" => Some("Task names must be unique within a pipeline."),
            "CONFIG-EMPTY" => Some("Add at least one task to the pipeline before building."),
            "CONFIG-SELF_DEP" => Some("Remove the task from its own dependency list."),
            "CONFIG-MISSING_AGENT" => Some("Register an agent for every task node."),
            "CONFIG-UNKNOWN_GATE" => Some(
                "Revision info must reference the number of a quality gate declared in the pipeline.",
            ),
            "CONFIG-GATE" => Some(
                "Every quality gate needs a unique gate number, and only quality gates may carry gate metadata.",
            ),
            "CONFIG-PROJECTION" => Some(
                "Input projections may only read initial inputs or outputs of upstream tasks.",
            ),
            _ => None,
        }
    }
}
