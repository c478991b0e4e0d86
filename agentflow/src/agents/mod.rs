//! The agent (task) abstraction the orchestrator consumes.
//!
//! An agent is a named unit of work that turns its projected input into
//! structured output, usually by calling the completion service. Agents
//! never see or mutate the execution context; the orchestrator hands them
//! their input and records their output.

mod completion_agent;
mod fn_agent;
mod validation;

pub use completion_agent::CompletionAgent;
pub use fn_agent::FnAgent;
pub use validation::{AcceptAll, FieldShape, JsonType, OutputShape, OutputValidator};

use crate::completion::CompletionClient;
use crate::core::AgentOutput;
use crate::errors::TaskError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Key under which a revision run attaches its instructions to the
/// revised task's input.
pub const REVISION_INPUT_KEY: &str = "revision";

/// Per-invocation information handed to an agent.
#[derive(Debug, Clone)]
pub struct AgentContext {
    run_id: Uuid,
    task: String,
    stage: usize,
    completion: Option<Arc<dyn CompletionClient>>,
}

impl AgentContext {
    /// Creates a context.
    #[must_use]
    pub fn new(run_id: Uuid, task: impl Into<String>, stage: usize) -> Self {
        Self {
            run_id,
            task: task.into(),
            stage,
            completion: None,
        }
    }

    /// Attaches the shared completion client.
    #[must_use]
    pub fn with_completion(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(client);
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the task name.
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Returns the stage index.
    #[must_use]
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Returns the shared completion client.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine was built without one.
    pub fn completion(&self) -> Result<&Arc<dyn CompletionClient>, TaskError> {
        self.completion
            .as_ref()
            .ok_or_else(|| TaskError::other(format!("No completion client configured for task '{}'", self.task)))
    }
}

/// A named unit of work.
#[async_trait]
pub trait Agent: Send + Sync + Debug {
    /// Returns the task name this agent implements.
    fn name(&self) -> &str;

    /// Produces output for `input`.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskError`] describing why no output was produced.
    async fn run(&self, input: &serde_json::Value, ctx: &AgentContext) -> Result<AgentOutput, TaskError>;

    /// The validator applied to this agent's output.
    fn validator(&self) -> &dyn OutputValidator {
        &AcceptAll
    }

    /// Deterministically reconstructs an output from the raw input when
    /// generated output fails validation. `None` means no fallback.
    fn fallback(&self, _input: &serde_json::Value) -> Option<serde_json::Value> {
        None
    }
}
