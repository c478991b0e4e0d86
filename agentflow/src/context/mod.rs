//! Run state shared between stages.
//!
//! [`ExecutionContext`] holds the validated outputs and critiques of one
//! orchestrator run. It is owned by the orchestrator; agents only ever see
//! the projection of it built for their input.

mod execution;

pub use execution::ExecutionContext;
