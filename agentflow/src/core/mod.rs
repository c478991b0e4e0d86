//! Core domain model types for agentflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Task status and agent kind enums
//! - Agent output, critiques and quality-gate verdicts

mod output;
mod status;

pub use output::{AgentOutput, Critique, CritiqueSeverity, QualityGateVerdict};
pub use status::{AgentKind, TaskStatus};
