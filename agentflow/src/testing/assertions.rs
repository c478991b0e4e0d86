//! Test assertions for run reports and emitted events.

use crate::core::TaskStatus;
use crate::errors::{PipelineResult, QualityGateFailure};
use crate::pipeline::RunReport;

/// Asserts that `task` ended with `expected`.
pub fn assert_task_status(report: &RunReport, task: &str, expected: TaskStatus) {
    let actual = report.statuses.get(task);
    assert_eq!(
        actual,
        Some(&expected),
        "Expected task '{}' to end {:?}, got {:?}",
        task,
        expected,
        actual
    );
}

/// Asserts that `task` was served from the cache.
pub fn assert_served_from_cache(report: &RunReport, task: &str) {
    assert!(
        report.cache_hits.iter().any(|hit| hit == task),
        "Expected task '{}' to be a cache hit. Hits: {:?}",
        task,
        report.cache_hits
    );
}

/// Asserts that the run stopped at quality gate `gate_number` and returns
/// the failure.
pub fn assert_gate_failure(result: &PipelineResult<RunReport>, gate_number: u32) -> QualityGateFailure {
    let failure = match result {
        Ok(report) => panic!("Expected quality gate {gate_number} to fail, run succeeded: {:?}", report.statuses),
        Err(err) => err
            .as_quality_gate()
            .unwrap_or_else(|| panic!("Expected a quality gate failure, got: {err}")),
    };
    assert_eq!(failure.gate_number, gate_number, "Wrong gate failed");
    failure.clone()
}

/// Returns the index of the first `event_type` event for `task`.
#[must_use]
pub fn event_position(events: &[(String, Option<serde_json::Value>)], event_type: &str, task: &str) -> Option<usize> {
    events.iter().position(|(kind, data)| {
        kind == event_type
            && data
                .as_ref()
                .and_then(|data| data.get("task"))
                .is_some_and(|name| name == task)
    })
}

/// Asserts that `first` (event type, task) was emitted before `second`.
pub fn assert_emitted_before(
    events: &[(String, Option<serde_json::Value>)],
    first: (&str, &str),
    second: (&str, &str),
) {
    let a = event_position(events, first.0, first.1);
    let b = event_position(events, second.0, second.1);
    match (a, b) {
        (Some(a), Some(b)) => assert!(a < b, "Expected {first:?} (#{a}) before {second:?} (#{b})"),
        _ => panic!("Missing events: {first:?} at {a:?}, {second:?} at {b:?}"),
    }
}
