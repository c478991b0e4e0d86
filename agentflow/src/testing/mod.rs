//! Testing utilities for agent pipelines.
//!
//! This module provides:
//! - Scripted mock agents and completion clients
//! - Assertions over run reports and event order
//! - A harness wiring mocks to a collecting event sink

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_emitted_before, assert_gate_failure, assert_served_from_cache, assert_task_status, event_position,
};
pub use fixtures::{fan_in_definition, gated_fan_in_definition, verdict, TestHarness};
pub use mocks::{ConcurrencyGauge, MockAgent, ScriptedCompletionClient};
