//! Test fixtures: verdicts, sample definitions and a harness wiring mock
//! agents to a collecting event sink.

use super::MockAgent;
use crate::agents::Agent;
use crate::events::CollectingEventSink;
use crate::pipeline::{PipelineBuilder, PipelineDefinition, TaskNode};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a quality gate output.
#[must_use]
pub fn verdict(passed: bool, score: f64, issues: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "passed": passed,
        "score": score,
        "issuesToAddress": issues,
    })
}

/// `a` and `b` without dependencies, `c` depending on both.
#[must_use]
pub fn fan_in_definition() -> PipelineDefinition {
    PipelineDefinition::new("fan-in")
        .with_task(TaskNode::new("a"))
        .with_task(TaskNode::new("b"))
        .with_task(TaskNode::new("c").depends_on(["a", "b"]))
}

/// Like [`fan_in_definition`], with `c` as quality gate 1 auditing `b`.
#[must_use]
pub fn gated_fan_in_definition() -> PipelineDefinition {
    PipelineDefinition::new("gated-fan-in")
        .with_task(TaskNode::new("a"))
        .with_task(TaskNode::new("b"))
        .with_task(TaskNode::quality_gate("c", 1).depends_on(["a", "b"]).audits("b"))
}

/// Mock agents plus a collecting sink.
#[derive(Debug, Default)]
pub struct TestHarness {
    /// Receives every event of every run.
    pub sink: Arc<CollectingEventSink>,
    agents: BTreeMap<String, Arc<MockAgent>>,
}

impl TestHarness {
    /// Creates an empty harness.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent` and returns a handle for inspecting it.
    pub fn agent(&mut self, agent: MockAgent) -> Arc<MockAgent> {
        let agent = Arc::new(agent);
        self.agents.insert(agent.name().to_string(), Arc::clone(&agent));
        agent
    }

    /// Returns the agent registered for `task`.
    #[must_use]
    pub fn get(&self, task: &str) -> Option<&Arc<MockAgent>> {
        self.agents.get(task)
    }

    /// Returns a builder over `definition` with every registered agent
    /// and the sink attached.
    #[must_use]
    pub fn builder(&self, definition: PipelineDefinition) -> PipelineBuilder {
        self.agents.values().fold(
            PipelineBuilder::from_definition(definition).event_sink(self.sink.clone()),
            |builder, agent| builder.agent(Arc::clone(agent) as Arc<dyn Agent>),
        )
    }

    /// Returns the emitted event types, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.sink.events().into_iter().map(|(kind, _)| kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::QualityGateVerdict;

    #[test]
    fn test_verdict_fixture_parses() {
        let parsed = QualityGateVerdict::from_output(&verdict(false, 0.3, &["thin"])).unwrap();
        assert!(!parsed.passed);
        assert_eq!(parsed.issues_to_address, vec!["thin".to_string()]);
    }

    #[test]
    fn test_harness_builder_registers_agents() {
        let mut harness = TestHarness::new();
        for name in ["a", "b", "c"] {
            harness.agent(MockAgent::new(name));
        }
        assert!(harness.get("b").is_some());
        assert!(harness.builder(fan_in_definition()).build().is_ok());
    }
}
