//! # Agentflow
//!
//! A staged orchestration engine for dependent generation agents.
//!
//! Agentflow compiles a declarative task graph into stages and runs
//! them with support for:
//!
//! - **Staged execution**: tasks run once every dependency has an output,
//!   with bounded parallelism inside a stage
//! - **Output caching**: TTL + LRU cache keyed on the projected task input,
//!   optionally mirrored to a durable key-value store
//! - **Resilience**: a circuit breaker, a token-bucket rate limiter and
//!   retries guarding every completion call
//! - **Quality gates**: gate tasks stop the run with a revision request
//!   that re-executes only the gate's module
//! - **Event-driven observability**: per-task transitions and run progress
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agentflow::prelude::*;
//!
//! let orchestrator = PipelineBuilder::new("novel")
//!     .task(TaskNode::new("premise"), premise_agent)
//!     .task(TaskNode::new("outline").depends_on(["premise"]), outline_agent)
//!     .task(TaskNode::quality_gate("review", 1).depends_on(["outline"]), review_agent)
//!     .completion_client(client)
//!     .build()?;
//!
//! match orchestrator.execute(json!({"idea": "a lighthouse"})).await {
//!     Ok(report) => println!("{:?}", report.outputs),
//!     Err(PipelineError::QualityGate(failure)) => {
//!         let revised = orchestrator
//!             .execute(RunRequest::new(inputs).with_revision(RevisionInfo::from(&failure)))
//!             .await?;
//!     }
//!     Err(err) => return Err(err.into()),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod agents;
pub mod cache;
pub mod completion;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::agents::{Agent, AgentContext, CompletionAgent, FnAgent, JsonType, OutputShape, OutputValidator};
    pub use crate::cache::{Cache, CacheConfig, FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
    pub use crate::completion::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse};
    pub use crate::context::ExecutionContext;
    pub use crate::core::{AgentKind, AgentOutput, Critique, QualityGateVerdict, TaskStatus};
    pub use crate::errors::{
        ConfigurationError, PipelineError, PipelineResult, QualityGateFailure, TaskError, TaskErrorKind,
        TaskExecutionError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        Checkpoint, EngineConfig, InFlightPolicy, Orchestrator, OrchestratorConfig, PipelineBuilder,
        PipelineDefinition, ProjectedField, RevisionInfo, RunReport, RunRequest, TaskNode,
    };
    pub use crate::resilience::{CircuitBreaker, RateLimiter, RetryConfig};
}
