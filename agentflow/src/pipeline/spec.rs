//! Declarative pipeline definitions.

use super::InputProjection;
use crate::core::AgentKind;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Quality gate metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    /// The gate number users and revision requests refer to.
    pub number: u32,
    /// The task whose artifact this gate audits; the revision target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audits: Option<String>,
}

/// A task declaration. Its stage is assigned by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique task name.
    pub name: String,
    /// Tasks that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// The kind of work the task performs.
    #[serde(default)]
    pub kind: AgentKind,
    /// The module (group of tasks guarded by one quality gate) this task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Gate metadata, required for quality gates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateSpec>,
}

impl TaskNode {
    /// Creates a generator task without dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            kind: AgentKind::Generator,
            module: None,
            gate: None,
        }
    }

    /// Creates an integrator task.
    #[must_use]
    pub fn integrator(name: impl Into<String>) -> Self {
        Self::new(name).with_kind(AgentKind::Integrator)
    }

    /// Creates a quality gate with the given number.
    #[must_use]
    pub fn quality_gate(name: impl Into<String>, number: u32) -> Self {
        let mut node = Self::new(name).with_kind(AgentKind::QualityGate);
        node.gate = Some(GateSpec { number, audits: None });
        node
    }

    /// Adds dependencies.
    #[must_use]
    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Sets the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: AgentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Places the task in a module.
    #[must_use]
    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Names the task a gate audits. Only meaningful on quality gates.
    #[must_use]
    pub fn audits(mut self, task: impl Into<String>) -> Self {
        if let Some(gate) = self.gate.as_mut() {
            gate.audits = Some(task.into());
        }
        self
    }

    /// Returns the gate number, if this is a quality gate.
    #[must_use]
    pub fn gate_number(&self) -> Option<u32> {
        self.gate.as_ref().map(|gate| gate.number)
    }

    /// Returns true for quality gates.
    #[must_use]
    pub fn is_quality_gate(&self) -> bool {
        self.kind.is_quality_gate()
    }
}

/// An ordered list of task declarations plus the input projection table.
///
/// Immutable once compiled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name.
    #[serde(default)]
    pub name: String,
    /// Task declarations in authoring order.
    #[serde(default)]
    pub tasks: Vec<TaskNode>,
    /// Per-task input projections.
    #[serde(default)]
    pub projections: InputProjection,
}

impl PipelineDefinition {
    /// Creates an empty definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a task.
    #[must_use]
    pub fn with_task(mut self, task: TaskNode) -> Self {
        self.tasks.push(task);
        self
    }

    /// Sets the projection table.
    #[must_use]
    pub fn with_projections(mut self, projections: InputProjection) -> Self {
        self.projections = projections;
        self
    }

    /// Parses a definition from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid definition.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json)
            .map_err(|err| ConfigurationError::new(format!("Invalid pipeline definition: {err}")))
    }

    /// Returns the task named `name`.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|task| task.name == name)
    }
}
