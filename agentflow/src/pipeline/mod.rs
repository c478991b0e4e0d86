//! Pipeline definition, compilation and execution.
//!
//! This module provides:
//! - Declarative task definitions and the input projection table
//! - The graph compiler assigning longest-path stages
//! - The pipeline builder with validation
//! - The stage executor and the quality-gate revision protocol

mod builder;
mod compiler;
mod config;
mod orchestrator;
mod projection;
mod revision;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use compiler::{compile, CompiledPipeline, CompiledTask};
pub use config::{EngineConfig, InFlightPolicy, OrchestratorConfig};
pub use orchestrator::{Checkpoint, Orchestrator, RunReport, RunRequest};
pub use projection::{FieldSource, InputProjection, ProjectedField, ProjectionMiss};
pub use revision::{RevisionInfo, RevisionPlan};
pub use spec::{GateSpec, PipelineDefinition, TaskNode};
