//! An agent that delegates to the completion service.

use super::{Agent, AgentContext, OutputShape, OutputValidator, REVISION_INPUT_KEY};
use crate::completion::CompletionRequest;
use crate::core::AgentOutput;
use crate::errors::TaskError;
use async_trait::async_trait;
use std::fmt::{Debug, Write as _};
use tracing::debug;

type FallbackFn = Box<dyn Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync>;

/// Renders its instructions plus the projected input into a prompt, asks
/// the completion service for output of the declared shape, and returns
/// the structured result.
///
/// On a revision run the prompt carries the previous artifact and the
/// issues to address, asking for a revision rather than a fresh draft.
pub struct CompletionAgent {
    name: String,
    instructions: String,
    shape: OutputShape,
    fallback: Option<FallbackFn>,
}

impl CompletionAgent {
    /// Creates an agent.
    #[must_use]
    pub fn new(name: impl Into<String>, instructions: impl Into<String>, shape: OutputShape) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            shape,
            fallback: None,
        }
    }

    /// Sets the fallback used when output fails validation.
    #[must_use]
    pub fn with_fallback(
        mut self,
        fallback: impl Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync + 'static,
    ) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Renders the prompt for `input`.
    #[must_use]
    pub fn render_prompt(&self, input: &serde_json::Value) -> String {
        let mut prompt = self.instructions.trim_end().to_string();

        let mut payload = input.clone();
        let revision = payload
            .as_object_mut()
            .and_then(|object| object.remove(REVISION_INPUT_KEY));

        let rendered = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
        let _ = write!(prompt, "\n\n## Input\n{rendered}");

        if let Some(revision) = revision {
            let gate = revision
                .get("failed_gate_number")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or_default();
            let _ = write!(
                prompt,
                "\n\n## Revision\nYour previous output failed quality gate {gate}. \
                 Revise it to address every issue below; keep what already works."
            );
            if let Some(previous) = revision.get("previous_output") {
                let previous = serde_json::to_string_pretty(previous).unwrap_or_default();
                let _ = write!(prompt, "\n\n### Previous output\n{previous}");
            }
            let issues = revision
                .get("issues_to_address")
                .and_then(serde_json::Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            prompt.push_str("\n\n### Issues to address");
            for issue in issues {
                let _ = write!(prompt, "\n- {}", issue.as_str().unwrap_or_default());
            }
        }

        prompt
    }
}

impl Debug for CompletionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionAgent")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("has_fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for CompletionAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &serde_json::Value, ctx: &AgentContext) -> Result<AgentOutput, TaskError> {
        let client = ctx.completion()?;
        let request = CompletionRequest::new(&self.name, self.render_prompt(input))
            .with_expected_shape(self.shape.to_json());

        let response = client.complete(&request).await?;
        debug!(
            task = %self.name,
            model = response.model.as_deref().unwrap_or("unknown"),
            tokens = response.total_tokens(),
            "Completion received"
        );
        Ok(AgentOutput::new(response.data))
    }

    fn validator(&self) -> &dyn OutputValidator {
        &self.shape
    }

    fn fallback(&self, input: &serde_json::Value) -> Option<serde_json::Value> {
        self.fallback.as_ref().and_then(|fallback| fallback(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::JsonType;
    use crate::completion::{CompletionError, CompletionResponse, MockCompletionClient};
    use crate::errors::TaskErrorKind;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn agent() -> CompletionAgent {
        CompletionAgent::new(
            "outline",
            "Write a chapter outline.",
            OutputShape::object().required("chapters", JsonType::Array),
        )
    }

    #[test]
    fn test_render_prompt_plain() {
        let prompt = agent().render_prompt(&json!({"premise": "heist"}));
        assert!(prompt.starts_with("Write a chapter outline."));
        assert!(prompt.contains("\"premise\": \"heist\""));
        assert!(!prompt.contains("## Revision"));
    }

    #[test]
    fn test_render_prompt_revision() {
        let input = json!({
            "premise": "heist",
            "revision": {
                "previous_output": {"chapters": ["one"]},
                "issues_to_address": ["too short", "no climax"],
                "failed_gate_number": 2
            }
        });
        let prompt = agent().render_prompt(&input);

        assert!(prompt.contains("failed quality gate 2"));
        assert!(prompt.contains("- too short\n- no climax"));
        assert!(prompt.contains("### Previous output"));
        let input_section = &prompt[..prompt.find("## Revision").unwrap()];
        assert!(!input_section.contains("issues_to_address"));
    }

    #[tokio::test]
    async fn test_run_uses_shared_client() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .withf(|request| request.task == "outline" && request.expected_shape.is_some())
            .times(1)
            .returning(|_| Ok(CompletionResponse::new(json!({"chapters": [1, 2]}))));

        let ctx = AgentContext::new(Uuid::nil(), "outline", 0).with_completion(Arc::new(client));
        let output = agent().run(&json!({}), &ctx).await.unwrap();
        assert_eq!(output.data, json!({"chapters": [1, 2]}));
    }

    #[tokio::test]
    async fn test_run_maps_completion_errors() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .returning(|_| Err(CompletionError::Transient("gateway timeout".to_string())));

        let ctx = AgentContext::new(Uuid::nil(), "outline", 0).with_completion(Arc::new(client));
        let err = agent().run(&json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Transport);
        assert!(err.retryable);
    }
}
