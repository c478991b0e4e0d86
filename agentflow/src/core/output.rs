//! Agent output, critiques and quality-gate verdicts.

use serde::{Deserialize, Serialize};

/// Severity of a critique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueSeverity {
    /// Worth a look.
    #[default]
    Minor,
    /// Should be addressed before the next gate.
    Major,
    /// Will likely fail a gate.
    Critical,
}

/// Feedback raised by a downstream task about an upstream task's output.
///
/// Critiques are advisory: the orchestrator records them but never
/// branches on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    /// The task whose output is criticised.
    pub target: String,
    /// The task that raised the critique. Filled in by the orchestrator.
    #[serde(default)]
    pub author: String,
    /// The feedback itself.
    pub message: String,
    /// How serious the issue is.
    #[serde(default)]
    pub severity: CritiqueSeverity,
}

impl Critique {
    /// Creates a minor critique of `target`.
    #[must_use]
    pub fn new(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            author: String::new(),
            message: message.into(),
            severity: CritiqueSeverity::Minor,
        }
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: CritiqueSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// The result of a successful agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// The structured artifact.
    pub data: serde_json::Value,
    /// Critiques of upstream artifacts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub critiques: Vec<Critique>,
}

impl AgentOutput {
    /// Creates an output with no critiques.
    #[must_use]
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            critiques: Vec::new(),
        }
    }

    /// Adds a critique.
    #[must_use]
    pub fn with_critique(mut self, critique: Critique) -> Self {
        self.critiques.push(critique);
        self
    }
}

impl From<serde_json::Value> for AgentOutput {
    fn from(data: serde_json::Value) -> Self {
        Self::new(data)
    }
}

/// The pass/fail verdict every quality gate output carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGateVerdict {
    /// Whether the audited artifacts are good enough to continue.
    pub passed: bool,
    /// The gate's score.
    pub score: f64,
    /// Actionable issues for a revision run.
    #[serde(default, alias = "issues_to_address")]
    pub issues_to_address: Vec<String>,
}

impl QualityGateVerdict {
    /// Creates a passing verdict.
    #[must_use]
    pub fn pass(score: f64) -> Self {
        Self {
            passed: true,
            score,
            issues_to_address: Vec::new(),
        }
    }

    /// Creates a failing verdict.
    #[must_use]
    pub fn fail(score: f64, issues: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            passed: false,
            score,
            issues_to_address: issues.into_iter().map(Into::into).collect(),
        }
    }

    /// Extracts the verdict from a gate's output.
    ///
    /// The verdict may sit at the top level of the output or under a
    /// `verdict` field.
    ///
    /// # Errors
    ///
    /// Returns the decoding error if neither location holds a verdict.
    pub fn from_output(output: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if let Some(nested) = output.get("verdict") {
            if let Ok(verdict) = Self::deserialize(nested) {
                return Ok(verdict);
            }
        }
        Self::deserialize(output)
    }

    /// Converts to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_verdict_from_top_level() {
        let output = json!({"passed": false, "score": 0.42, "issuesToAddress": ["flat villain"]});
        let verdict = QualityGateVerdict::from_output(&output).unwrap();
        assert!(!verdict.passed);
        assert_eq!(verdict.issues_to_address, vec!["flat villain".to_string()]);
    }

    #[test]
    fn test_verdict_nested_and_snake_case() {
        let output = json!({
            "summary": "ok",
            "verdict": {"passed": true, "score": 9, "issues_to_address": []}
        });
        let verdict = QualityGateVerdict::from_output(&output).unwrap();
        assert!(verdict.passed);
        assert!((verdict.score - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verdict_missing() {
        assert!(QualityGateVerdict::from_output(&json!({"summary": "no verdict"})).is_err());
    }

    #[test]
    fn test_verdict_serializes_camel_case() {
        let json = QualityGateVerdict::fail(3.0, ["x"]).to_json();
        assert_eq!(json["issuesToAddress"][0], "x");
    }

    #[test]
    fn test_agent_output_critique_serde() {
        let output = AgentOutput::new(json!({"title": "t"}))
            .with_critique(Critique::new("outline", "too short").with_severity(CritiqueSeverity::Major));
        let roundtrip: AgentOutput =
            serde_json::from_value(serde_json::to_value(&output).unwrap()).unwrap();
        assert_eq!(roundtrip, output);
    }
}
