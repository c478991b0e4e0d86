//! Quality-gate-driven revision runs.
//!
//! When a gate fails, the caller may re-run the pipeline with a
//! [`RevisionInfo`]. The run then re-executes the module the gate
//! guards with the cache bypassed, and hands the audited task its
//! previous artifact together with the issues to address. Tasks outside
//! the module keep reading the cache.

use super::CompiledPipeline;
use crate::errors::{ConfigurationError, QualityGateFailure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A request to revise the module guarded by a failed gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    /// The gate that failed.
    #[serde(alias = "failed_gate_number")]
    pub failed_gate_number: u32,
    /// What the revision must fix.
    #[serde(default, alias = "issues_to_address")]
    pub issues_to_address: Vec<String>,
    /// The rejected artifact of the revision target, when it is known.
    #[serde(default, alias = "previous_output", skip_serializing_if = "Option::is_none")]
    pub previous_output: Option<serde_json::Value>,
}

impl RevisionInfo {
    /// Creates revision info.
    #[must_use]
    pub fn new(failed_gate_number: u32, issues: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            failed_gate_number,
            issues_to_address: issues.into_iter().map(Into::into).collect(),
            previous_output: None,
        }
    }

    /// Attaches the rejected artifact the target should rework.
    #[must_use]
    pub fn with_previous_output(mut self, output: serde_json::Value) -> Self {
        self.previous_output = Some(output);
        self
    }
}

impl From<&QualityGateFailure> for RevisionInfo {
    fn from(failure: &QualityGateFailure) -> Self {
        Self {
            failed_gate_number: failure.gate_number,
            issues_to_address: failure.issues_to_address.clone(),
            previous_output: failure.previous_output.clone(),
        }
    }
}

/// The resolved shape of a revision run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionPlan {
    /// The failed gate's number.
    pub gate_number: u32,
    /// The failed gate's task name.
    pub gate_task: String,
    /// First stage that is re-executed. Earlier stages may be restored
    /// from a prior context.
    pub resume_stage: usize,
    /// Tasks re-run with the cache bypassed.
    pub module_tasks: BTreeSet<String>,
    /// The task whose input carries the previous artifact and issues.
    pub target: Option<String>,
    /// The issues to address.
    pub issues_to_address: Vec<String>,
    /// The rejected artifact carried by the request.
    pub previous_output: Option<serde_json::Value>,
}

impl RevisionPlan {
    /// Resolves `info` against `pipeline`.
    ///
    /// The module is every task sharing the gate's `module` label. For an
    /// unlabelled gate it is the gate, the task it audits and every task
    /// on a dependency path between the two; a gate that audits nothing
    /// forms a module of its own. The run resumes right after the
    /// previous gate, or earlier if a module task sits before it.
    ///
    /// # Errors
    ///
    /// Returns an error if no gate carries the requested number.
    pub fn plan(pipeline: &CompiledPipeline, info: &RevisionInfo) -> Result<Self, ConfigurationError> {
        let gate = pipeline.gate(info.failed_gate_number).ok_or_else(|| {
            ConfigurationError::coded(
                "CONFIG-UNKNOWN_GATE",
                pipeline.name(),
                format!("No quality gate numbered {}", info.failed_gate_number),
            )
        })?;

        let previous_gate_stage = pipeline
            .gates()
            .filter(|other| other.stage < gate.stage)
            .map(|other| other.stage)
            .max();
        let after_previous_gate = previous_gate_stage.map_or(0, |stage| stage + 1);

        let module_tasks: BTreeSet<String> = match &gate.node.module {
            Some(module) => pipeline
                .tasks()
                .iter()
                .filter(|task| task.node.module.as_deref() == Some(module.as_str()))
                .map(|task| task.name().to_string())
                .collect(),
            None => {
                let audits = gate.node.gate.as_ref().and_then(|spec| spec.audits.as_deref());
                let gate_ancestors = pipeline.ancestors(gate.name());
                let mut module: BTreeSet<String> = pipeline
                    .tasks()
                    .iter()
                    .filter(|task| {
                        audits.is_some_and(|audited| {
                            gate_ancestors.contains(task.name())
                                && (task.name() == audited || pipeline.ancestors(task.name()).contains(audited))
                        })
                    })
                    .map(|task| task.name().to_string())
                    .collect();
                module.insert(gate.name().to_string());
                module
            }
        };

        let resume_stage = module_tasks
            .iter()
            .filter_map(|name| pipeline.stage_of(name))
            .min()
            .map_or(after_previous_gate, |earliest| earliest.min(after_previous_gate));

        let audited = gate
            .node
            .gate
            .as_ref()
            .and_then(|spec| spec.audits.clone())
            .filter(|audited| module_tasks.contains(audited));
        let target = audited.or_else(|| {
            pipeline
                .stages()
                .iter()
                .flatten()
                .filter(|name| module_tasks.contains(name.as_str()))
                .find(|name| pipeline.task(name).is_some_and(|task| !task.node.is_quality_gate()))
                .cloned()
        });

        Ok(Self {
            gate_number: info.failed_gate_number,
            gate_task: gate.name().to_string(),
            resume_stage,
            module_tasks,
            target,
            issues_to_address: info.issues_to_address.clone(),
            previous_output: info.previous_output.clone(),
        })
    }

    /// Returns true if `task` is re-run with the cache bypassed.
    #[must_use]
    pub fn in_module(&self, task: &str) -> bool {
        self.module_tasks.contains(task)
    }

    /// Returns true if `task` receives the revision instructions.
    #[must_use]
    pub fn is_target(&self, task: &str) -> bool {
        self.target.as_deref() == Some(task)
    }

    /// Builds the instructions attached to the target's input.
    #[must_use]
    pub fn instructions(&self, previous_output: Option<serde_json::Value>) -> serde_json::Value {
        serde_json::json!({
            "previous_output": previous_output.unwrap_or(serde_json::Value::Null),
            "issues_to_address": self.issues_to_address,
            "failed_gate_number": self.gate_number,
        })
    }
}
