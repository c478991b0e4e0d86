//! Task status and agent kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work an agent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Generates a new artifact from upstream data.
    #[default]
    Generator,
    /// Merges several upstream artifacts into one bible.
    Integrator,
    /// Audits accumulated bibles and yields a pass/fail verdict.
    QualityGate,
}

impl AgentKind {
    /// Returns true for quality gates.
    #[must_use]
    pub const fn is_quality_gate(self) -> bool {
        matches!(self, Self::QualityGate)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generator => write!(f, "generator"),
            Self::Integrator => write!(f, "integrator"),
            Self::QualityGate => write!(f, "quality_gate"),
        }
    }
}

/// The execution status of a task as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting for its stage.
    #[default]
    Pending,
    /// Task is currently running.
    Running,
    /// Task produced a validated output (executed, cached, or restored).
    Success,
    /// Task failed.
    Error,
    /// Task was skipped because a hard precondition was absent.
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl TaskStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Skipped)
    }

    /// Returns true if the task counts toward progress.
    #[must_use]
    pub const fn is_resolved_ok(self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// The event type emitted for a transition into this status.
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::Pending => "task.pending",
            Self::Running => "task.running",
            Self::Success => "task.success",
            Self::Error => "task.error",
            Self::Skipped => "task.skipped",
        }
    }
}
