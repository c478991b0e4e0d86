//! End-to-end tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::agents::{Agent, CompletionAgent, JsonType, OutputShape};
    use crate::cache::{task_cache_key, InMemoryKeyValueStore, KeyValueStore};
    use crate::completion::CompletionClient;
    use crate::core::{AgentOutput, Critique, TaskStatus};
    use crate::errors::{PipelineError, TaskError, TaskErrorKind};
    use crate::pipeline::{
        Checkpoint, EngineConfig, InFlightPolicy, OrchestratorConfig, PipelineBuilder, PipelineDefinition,
        ProjectedField, RevisionInfo, RunRequest, TaskNode,
    };
    use crate::resilience::RetryConfig;
    use crate::testing::{
        assert_emitted_before, assert_gate_failure, assert_served_from_cache, assert_task_status,
        fan_in_definition, gated_fan_in_definition, verdict, ConcurrencyGauge, MockAgent,
        ScriptedCompletionClient, TestHarness,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn inputs() -> serde_json::Value {
        json!({"premise": "a lighthouse keeper finds a map"})
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_in_runs_roots_concurrently_then_dependent() {
        let gauge = ConcurrencyGauge::shared();
        let mut harness = TestHarness::new();
        let a = harness.agent(
            MockAgent::new("a")
                .returning(json!({"tone": "bleak"}))
                .with_delay(Duration::from_millis(50))
                .with_gauge(Arc::clone(&gauge)),
        );
        harness.agent(
            MockAgent::new("b")
                .returning(json!({"cast": ["Ida"]}))
                .with_delay(Duration::from_millis(50))
                .with_gauge(Arc::clone(&gauge)),
        );
        let c = harness.agent(MockAgent::new("c").with_gauge(Arc::clone(&gauge)));

        let orchestrator = harness.builder(fan_in_definition()).build().unwrap();
        assert_eq!(
            orchestrator.pipeline().stages(),
            &[vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]
        );

        let report = orchestrator.execute(inputs()).await.unwrap();

        assert_eq!(gauge.peak(), 2);
        assert_eq!(report.invocations, 3);
        assert_eq!(a.last_input(), Some(inputs()));
        assert_eq!(
            c.last_input(),
            Some(json!({"a": {"tone": "bleak"}, "b": {"cast": ["Ida"]}}))
        );
        assert_eq!(report.outputs.keys().collect::<Vec<_>>(), vec!["c"]);

        let events = harness.sink.events();
        assert_emitted_before(&events, ("task.success", "a"), ("task.running", "c"));
        assert_emitted_before(&events, ("task.success", "b"), ("task.running", "c"));
        assert_emitted_before(&events, ("task.pending", "c"), ("task.running", "a"));

        let progress = harness.sink.events_of_type("pipeline.progress");
        let last = progress.last().and_then(|(_, data)| data.clone()).unwrap();
        assert_eq!(last["completed"], 3);
        assert_eq!(last["total"], 3);
        assert_eq!(harness.event_types().last().map(String::as_str), Some("pipeline.completed"));
    }

    #[tokio::test]
    async fn test_failed_gate_stops_run_and_keeps_upstream_cached() {
        let mut harness = TestHarness::new();
        harness.agent(MockAgent::new("a"));
        harness.agent(MockAgent::new("b"));
        harness.agent(MockAgent::new("c").returning(verdict(false, 0.4, &["b lacks a villain"])));

        let orchestrator = harness.builder(gated_fan_in_definition()).build().unwrap();
        let result = orchestrator.execute(inputs()).await;

        let failure = assert_gate_failure(&result, 1);
        assert_eq!(failure.task, "c");
        assert_eq!(failure.stage, 1);
        assert_eq!(failure.issues_to_address, vec!["b lacks a villain".to_string()]);

        let cache = orchestrator.cache();
        assert!(cache.peek(&task_cache_key("a", &inputs())).is_some());
        assert!(cache.peek(&task_cache_key("b", &inputs())).is_some());

        let events = harness.event_types();
        assert!(events.iter().any(|kind| kind == "quality_gate.failed"));
        assert_eq!(events.last().map(String::as_str), Some("pipeline.failed"));
    }

    #[tokio::test]
    async fn test_revision_reruns_gate_module_and_reuses_cached_upstream() {
        let definition = PipelineDefinition::new("review")
            .with_task(TaskNode::new("a"))
            .with_task(TaskNode::new("b"))
            .with_task(TaskNode::quality_gate("c", 1).depends_on(["a", "b"]).in_module("review"));

        let mut harness = TestHarness::new();
        let a = harness.agent(MockAgent::new("a"));
        let b = harness.agent(MockAgent::new("b"));
        let c = harness.agent(
            MockAgent::new("c")
                .then(Ok(AgentOutput::new(verdict(false, 0.3, &["contradiction in b"]))))
                .returning(verdict(true, 0.9, &[])),
        );
        let orchestrator = harness.builder(definition).build().unwrap();

        let result = orchestrator.execute(inputs()).await;
        let failure = assert_gate_failure(&result, 1);

        let request = RunRequest::new(inputs()).with_revision(RevisionInfo::from(&failure));
        let report = orchestrator.execute(request).await.unwrap();

        assert_served_from_cache(&report, "a");
        assert_served_from_cache(&report, "b");
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
        assert_eq!(c.call_count(), 2);
        assert_eq!(report.invocations, 1);
        assert!(report.gate_verdicts[&1].passed);
    }

    #[tokio::test]
    async fn test_unlabelled_gate_revision_reruns_audited_task_only() {
        let mut harness = TestHarness::new();
        let a = harness.agent(MockAgent::new("a"));
        let b = harness.agent(
            MockAgent::new("b")
                .then(Ok(AgentOutput::new(json!({"cast": ["Ida"]}))))
                .returning(json!({"cast": ["Ida", "Tomas"]})),
        );
        let c = harness.agent(
            MockAgent::new("c")
                .then(Ok(AgentOutput::new(verdict(false, 0.4, &["needs a rival"]))))
                .returning(verdict(true, 0.9, &[])),
        );
        let orchestrator = harness.builder(gated_fan_in_definition()).build().unwrap();

        let failure = assert_gate_failure(&orchestrator.execute(inputs()).await, 1);
        assert_eq!(failure.previous_output, Some(json!({"cast": ["Ida"]})));

        let report = orchestrator
            .execute(RunRequest::new(inputs()).with_revision(RevisionInfo::from(&failure)))
            .await
            .unwrap();

        assert_served_from_cache(&report, "a");
        assert_eq!(report.cache_hits, vec!["a".to_string()]);
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 2);
        assert_eq!(c.call_count(), 2);
        assert_eq!(report.invocations, 2);
        assert_eq!(
            b.last_input().unwrap()["revision"]["previous_output"],
            json!({"cast": ["Ida"]})
        );
        assert!(report.gate_verdicts[&1].passed);
    }

    #[tokio::test]
    async fn test_unlabelled_gate_without_audit_reruns_only_the_gate() {
        let definition = PipelineDefinition::new("plain-gate")
            .with_task(TaskNode::new("a"))
            .with_task(TaskNode::new("b"))
            .with_task(TaskNode::quality_gate("c", 1).depends_on(["a", "b"]));

        let mut harness = TestHarness::new();
        let a = harness.agent(MockAgent::new("a"));
        let b = harness.agent(MockAgent::new("b"));
        let c = harness.agent(
            MockAgent::new("c")
                .then(Ok(AgentOutput::new(verdict(false, 0.3, &["contradiction in b"]))))
                .returning(verdict(true, 0.9, &[])),
        );
        let orchestrator = harness.builder(definition).build().unwrap();

        let failure = assert_gate_failure(&orchestrator.execute(inputs()).await, 1);
        assert_eq!(failure.previous_output, None);
        let report = orchestrator
            .execute(RunRequest::new(inputs()).with_revision(RevisionInfo::from(&failure)))
            .await
            .unwrap();

        assert_served_from_cache(&report, "a");
        assert_served_from_cache(&report, "b");
        assert_eq!(a.call_count() + b.call_count(), 2);
        assert_eq!(c.call_count(), 2);
        assert_eq!(report.invocations, 1);
        assert!(c.last_input().unwrap().get("revision").is_none());
    }

    #[tokio::test]
    async fn test_revision_target_gets_failed_artifact_when_upstream_changes() {
        let definition = PipelineDefinition::new("bible")
            .with_task(TaskNode::new("x").in_module("bible"))
            .with_task(TaskNode::new("y").depends_on(["x"]).in_module("bible"))
            .with_task(
                TaskNode::quality_gate("gate", 1)
                    .depends_on(["y"])
                    .audits("y")
                    .in_module("bible"),
            );

        let mut harness = TestHarness::new();
        harness.agent(
            MockAgent::new("x")
                .then(Ok(AgentOutput::new(json!({"world": "x1"}))))
                .returning(json!({"world": "x2"})),
        );
        let y = harness.agent(
            MockAgent::new("y")
                .then(Ok(AgentOutput::new(json!({"bible": "v1"}))))
                .returning(json!({"bible": "v2"})),
        );
        harness.agent(
            MockAgent::new("gate")
                .then(Ok(AgentOutput::new(verdict(false, 0.2, &["inconsistent"]))))
                .returning(verdict(true, 0.9, &[])),
        );
        let orchestrator = harness.builder(definition).build().unwrap();

        let failure = assert_gate_failure(&orchestrator.execute(inputs()).await, 1);
        let report = orchestrator
            .execute(RunRequest::new(inputs()).with_revision(RevisionInfo::from(&failure)))
            .await
            .unwrap();

        let input = y.last_input().unwrap();
        assert_eq!(input["x"], json!({"world": "x2"}));
        assert_eq!(input["revision"]["previous_output"], json!({"bible": "v1"}));
        assert_eq!(input["revision"]["issues_to_address"], json!(["inconsistent"]));
        assert_eq!(report.output("y"), Some(&json!({"bible": "v2"})));
    }

    #[tokio::test]
    async fn test_revision_hands_target_previous_output_and_issues() {
        let definition = PipelineDefinition::new("drafts")
            .with_task(TaskNode::new("a"))
            .with_task(TaskNode::new("b").in_module("draft"))
            .with_task(
                TaskNode::quality_gate("c", 1)
                    .depends_on(["a", "b"])
                    .audits("b")
                    .in_module("draft"),
            );

        let mut harness = TestHarness::new();
        harness.agent(MockAgent::new("a"));
        let b = harness.agent(
            MockAgent::new("b")
                .then(Ok(AgentOutput::new(json!({"draft": 1}))))
                .returning(json!({"draft": 2})),
        );
        harness.agent(
            MockAgent::new("c")
                .then(Ok(AgentOutput::new(verdict(false, 0.2, &["too short"]))))
                .returning(verdict(true, 0.8, &[])),
        );
        let orchestrator = harness.builder(definition).build().unwrap();

        let failure = assert_gate_failure(&orchestrator.execute(inputs()).await, 1);
        let revised = orchestrator
            .execute(RunRequest::new(inputs()).with_revision(RevisionInfo::from(&failure)))
            .await
            .unwrap();

        let input = b.last_input().unwrap();
        assert_eq!(input["premise"], inputs()["premise"]);
        assert_eq!(input["revision"]["previous_output"], json!({"draft": 1}));
        assert_eq!(input["revision"]["issues_to_address"], json!(["too short"]));
        assert_eq!(input["revision"]["failed_gate_number"], 1);
        assert_served_from_cache(&revised, "a");
        assert_eq!(revised.output("b"), Some(&json!({"draft": 2})));

        // The revised artifact replaced the stale entry.
        let plain = orchestrator.execute(inputs()).await.unwrap();
        assert_eq!(plain.invocations, 0);
        assert_eq!(plain.output("b"), Some(&json!({"draft": 2})));
    }

    #[tokio::test]
    async fn test_revision_resumes_from_checkpointed_context() {
        let definition = PipelineDefinition::new("novel")
            .with_task(TaskNode::new("premise"))
            .with_task(TaskNode::quality_gate("gate1", 1).depends_on(["premise"]).audits("premise"))
            .with_task(TaskNode::new("cast").depends_on(["gate1"]))
            .with_task(TaskNode::quality_gate("gate2", 2).depends_on(["cast"]).audits("cast"));

        let mut harness = TestHarness::new();
        let premise = harness.agent(MockAgent::new("premise"));
        let gate1 = harness.agent(MockAgent::new("gate1").returning(verdict(true, 0.9, &[])));
        let cast = harness.agent(
            MockAgent::new("cast")
                .then(Ok(AgentOutput::new(json!({"names": ["Ida"]}))))
                .returning(json!({"names": ["Ida", "Tomas"]})),
        );
        harness.agent(
            MockAgent::new("gate2")
                .then(Ok(AgentOutput::new(verdict(false, 0.5, &["needs a rival"]))))
                .returning(verdict(true, 0.85, &[])),
        );
        let orchestrator = harness
            .builder(definition)
            .config(OrchestratorConfig::default().with_cache(false))
            .build()
            .unwrap();

        let store = Arc::new(InMemoryKeyValueStore::new());
        let checkpoint = Checkpoint::new(Arc::clone(&store) as Arc<dyn KeyValueStore>, "context:novel");
        let result = orchestrator
            .execute(RunRequest::new(inputs()).with_checkpoint(checkpoint.clone()))
            .await;
        let failure = assert_gate_failure(&result, 2);

        let prior = checkpoint.load().await.unwrap().unwrap();
        assert_eq!(prior.output("cast"), Some(&json!({"names": ["Ida"]})));

        let report = orchestrator
            .execute(
                RunRequest::new(inputs())
                    .with_revision(RevisionInfo::from(&failure))
                    .resume_from(prior),
            )
            .await
            .unwrap();

        assert_eq!(report.restored, vec!["premise".to_string(), "gate1".to_string()]);
        assert_eq!(premise.call_count(), 1);
        assert_eq!(gate1.call_count(), 1);
        assert_eq!(
            cast.last_input().unwrap()["revision"]["previous_output"],
            json!({"names": ["Ida"]})
        );
        assert_eq!(report.output("cast"), Some(&json!({"names": ["Ida", "Tomas"]})));
        assert!(report.cache_hits.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_revision_gate_fails_before_any_task() {
        let mut harness = TestHarness::new();
        let a = harness.agent(MockAgent::new("a"));
        harness.agent(MockAgent::new("b"));
        harness.agent(MockAgent::new("c"));
        let orchestrator = harness.builder(fan_in_definition()).build().unwrap();

        let err = orchestrator
            .execute(RunRequest::new(inputs()).with_revision(RevisionInfo::new(7, ["x"])))
            .await
            .unwrap_err();

        match err {
            PipelineError::Configuration(config) => assert_eq!(config.code(), Some("CONFIG-UNKNOWN_GATE")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(a.call_count(), 0);
        assert!(harness.sink.events_of_type("task.").is_empty());
    }

    #[tokio::test]
    async fn test_second_identical_run_makes_no_completion_calls() {
        let client = Arc::new(ScriptedCompletionClient::new(json!({"text": "generated"})));
        let shape = OutputShape::object().required("text", JsonType::String);
        let agents: Vec<Arc<dyn Agent>> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                Arc::new(CompletionAgent::new(name, format!("Write the {name} section."), shape.clone()))
                    as Arc<dyn Agent>
            })
            .collect();

        let orchestrator = agents
            .into_iter()
            .fold(PipelineBuilder::from_definition(fan_in_definition()), PipelineBuilder::agent)
            .completion_client(Arc::clone(&client) as Arc<dyn CompletionClient>)
            .build()
            .unwrap();

        let first = orchestrator.execute(inputs()).await.unwrap();
        assert_eq!(client.call_count(), 3);

        let second = orchestrator.execute(inputs()).await.unwrap();
        assert_eq!(client.call_count(), 3);
        assert_eq!(second.invocations, 0);
        assert_eq!(second.cache_hits.len(), 3);
        assert_eq!(second.outputs, first.outputs);
        assert_eq!(second.context, first.context);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_completion_failures_surface_as_retryable_task_error() {
        let client = Arc::new(
            ScriptedCompletionClient::new(json!({}))
                .then(Err(crate::completion::CompletionError::Transient("503 service unavailable".into())))
                .then(Err(crate::completion::CompletionError::Transient("503 service unavailable".into()))),
        );
        let config = EngineConfig {
            retry: RetryConfig::new().with_max_attempts(2).with_base_delay_ms(10),
            ..EngineConfig::default()
        };
        let orchestrator = PipelineBuilder::new("single")
            .task(
                TaskNode::new("a"),
                Arc::new(CompletionAgent::new("a", "Write.", OutputShape::object())),
            )
            .engine_config(config)
            .completion_client(Arc::clone(&client) as Arc<dyn CompletionClient>)
            .build()
            .unwrap();

        let err = orchestrator.execute(inputs()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.task(), Some("a"));
        assert_eq!(client.call_count(), 2);
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_input_skips_task_and_dependents() {
        let mut harness = TestHarness::new();
        let a = harness.agent(MockAgent::new("a"));
        let b = harness.agent(MockAgent::new("b"));
        let c = harness.agent(MockAgent::new("c"));
        let orchestrator = harness
            .builder(fan_in_definition())
            .projection("b", ProjectedField::initial("epilogue_notes"))
            .build()
            .unwrap();

        let report = orchestrator.execute(inputs()).await.unwrap();

        assert_task_status(&report, "a", TaskStatus::Success);
        assert_task_status(&report, "b", TaskStatus::Skipped);
        assert_task_status(&report, "c", TaskStatus::Skipped);
        assert_eq!(report.skipped, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count() + c.call_count(), 0);
        assert!(report.outputs.is_empty());

        let skipped = harness.sink.events_of_type("task.skipped");
        assert_eq!(skipped.len(), 2);
        let reason = skipped[0].1.as_ref().unwrap()["message"].as_str().unwrap().to_string();
        assert!(reason.contains("epilogue_notes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_failure_lets_siblings_finish_and_cache() {
        let mut harness = TestHarness::new();
        harness.agent(MockAgent::new("a").with_delay(Duration::from_millis(20)));
        harness.agent(MockAgent::new("b").failing(TaskError::transport("503 service unavailable")));
        let c = harness.agent(MockAgent::new("c"));
        let orchestrator = harness.builder(fan_in_definition()).build().unwrap();

        let err = orchestrator.execute(inputs()).await.unwrap_err();

        match &err {
            PipelineError::TaskExecution(failure) => {
                assert_eq!(failure.task, "b");
                assert_eq!(failure.stage, 0);
                assert_eq!(failure.kind, TaskErrorKind::Transport);
                assert!(failure.retryable);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(orchestrator.cache().peek(&task_cache_key("a", &inputs())).is_some());
        assert_eq!(c.call_count(), 0);

        let errors = harness.sink.events_of_type("task.error");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1.as_ref().unwrap()["retryable"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_on_failure_aborts_siblings() {
        let mut harness = TestHarness::new();
        let a = harness.agent(MockAgent::new("a").with_delay(Duration::from_secs(5)));
        harness.agent(MockAgent::new("b").failing(TaskError::other("schema mismatch")));
        harness.agent(MockAgent::new("c"));
        let orchestrator = harness
            .builder(fan_in_definition())
            .config(OrchestratorConfig::default().with_in_flight_policy(InFlightPolicy::CancelOnFailure))
            .build()
            .unwrap();

        let err = orchestrator.execute(inputs()).await.unwrap_err();

        assert_eq!(err.task(), Some("b"));
        assert!(!err.is_retryable());
        assert_eq!(a.call_count(), 1);
        assert!(orchestrator.cache().is_empty());

        let errors = harness.sink.events_of_type("task.error");
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .any(|(_, data)| data.as_ref().is_some_and(|d| d["message"].as_str().unwrap_or("").starts_with("Cancelled"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_respect_parallelism_cap() {
        let gauge = ConcurrencyGauge::shared();
        let mut harness = TestHarness::new();
        let mut definition = PipelineDefinition::new("wide");
        for i in 0..5 {
            let name = format!("t{i}");
            definition = definition.with_task(TaskNode::new(&name));
            harness.agent(
                MockAgent::new(&name)
                    .with_delay(Duration::from_millis(10))
                    .with_gauge(Arc::clone(&gauge)),
            );
        }
        let orchestrator = harness
            .builder(definition)
            .config(OrchestratorConfig::default().with_max_parallel_agents(2))
            .build()
            .unwrap();

        let report = orchestrator.execute(inputs()).await.unwrap();

        assert_eq!(report.invocations, 5);
        assert_eq!(gauge.peak(), 2);
    }

    #[tokio::test]
    async fn test_failed_gate_can_be_passed_through() {
        let definition = PipelineDefinition::new("lenient")
            .with_task(TaskNode::new("a"))
            .with_task(TaskNode::quality_gate("g", 1).depends_on(["a"]))
            .with_task(TaskNode::new("d").depends_on(["g"]));

        let mut harness = TestHarness::new();
        harness.agent(MockAgent::new("a"));
        harness.agent(MockAgent::new("g").returning(verdict(false, 0.1, &["weak"])));
        let d = harness.agent(MockAgent::new("d"));
        let orchestrator = harness
            .builder(definition)
            .config(OrchestratorConfig::default().with_abort_on_gate_failure(false))
            .build()
            .unwrap();

        let report = orchestrator.execute(inputs()).await.unwrap();

        assert!(!report.gate_verdicts[&1].passed);
        assert_eq!(d.call_count(), 1);
        assert_task_status(&report, "d", TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_gate_output_without_verdict_is_a_validation_failure() {
        let definition = PipelineDefinition::new("broken-gate")
            .with_task(TaskNode::new("a"))
            .with_task(TaskNode::quality_gate("g", 1).depends_on(["a"]));

        let mut harness = TestHarness::new();
        harness.agent(MockAgent::new("a"));
        harness.agent(MockAgent::new("g").returning(json!({"looks": "fine"})));
        let orchestrator = harness.builder(definition).build().unwrap();

        match orchestrator.execute(inputs()).await.unwrap_err() {
            PipelineError::TaskExecution(failure) => {
                assert_eq!(failure.task, "g");
                assert_eq!(failure.kind, TaskErrorKind::Validation);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_agent_panic_becomes_task_failure() {
        let mut harness = TestHarness::new();
        harness.agent(MockAgent::new("a").panicking("kaboom"));
        harness.agent(MockAgent::new("b"));
        harness.agent(MockAgent::new("c"));
        let orchestrator = harness.builder(fan_in_definition()).build().unwrap();

        match orchestrator.execute(inputs()).await.unwrap_err() {
            PipelineError::TaskExecution(failure) => {
                assert_eq!(failure.kind, TaskErrorKind::Panicked);
                assert!(failure.message.contains("kaboom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_output_uses_fallback_and_caches_it() {
        let mut harness = TestHarness::new();
        harness.agent(
            MockAgent::new("a")
                .returning(json!({"oops": true}))
                .with_validator(OutputShape::object().required("title", JsonType::String))
                .with_fallback(json!({"title": "Untitled"})),
        );
        let orchestrator = harness
            .builder(PipelineDefinition::new("one").with_task(TaskNode::new("a")))
            .build()
            .unwrap();

        let report = orchestrator.execute(inputs()).await.unwrap();

        assert_eq!(report.output("a"), Some(&json!({"title": "Untitled"})));
        assert_eq!(
            orchestrator.cache().peek(&task_cache_key("a", &inputs())),
            Some(json!({"title": "Untitled"}))
        );
    }

    #[tokio::test]
    async fn test_critiques_are_filed_under_their_target() {
        let mut harness = TestHarness::new();
        harness.agent(MockAgent::new("a"));
        harness.agent(
            MockAgent::new("b").then(Ok(AgentOutput::new(json!({"cast": []}))
                .with_critique(Critique::new("a", "The tone drifts in act two")))),
        );
        harness.agent(MockAgent::new("c"));
        let definition = PipelineDefinition::new("critique")
            .with_task(TaskNode::new("a"))
            .with_task(TaskNode::new("b").depends_on(["a"]))
            .with_task(TaskNode::new("c").depends_on(["b"]));
        let orchestrator = harness.builder(definition).build().unwrap();

        let report = orchestrator.execute(inputs()).await.unwrap();

        let critiques = report.context.critiques_for("a");
        assert_eq!(critiques.len(), 1);
        assert_eq!(critiques[0].author, "b");
        assert!(report.context.critiques_for("b").is_empty());
    }
}
