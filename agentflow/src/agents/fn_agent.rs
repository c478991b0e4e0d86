//! Closure-backed agents.

use super::{AcceptAll, Agent, AgentContext, OutputValidator};
use crate::core::AgentOutput;
use crate::errors::TaskError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;

type FallbackFn = Box<dyn Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + Sync>;

/// An agent whose work is an async closure over its input.
///
/// Handy for integrators that merge upstream outputs without calling the
/// completion service, and for tests.
pub struct FnAgent<F> {
    name: String,
    func: F,
    validator: Box<dyn OutputValidator>,
    fallback: Option<FallbackFn>,
}

impl<F, Fut> FnAgent<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    /// Creates an agent running `func`.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            validator: Box::new(AcceptAll),
            fallback: None,
        }
    }

    /// Sets the output validator.
    #[must_use]
    pub fn with_validator(mut self, validator: impl OutputValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
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
}

impl<F> Debug for FnAgent<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAgent")
            .field("name", &self.name)
            .field("validator", &self.validator)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &serde_json::Value, _ctx: &AgentContext) -> Result<AgentOutput, TaskError> {
        let data = (self.func)(input.clone()).await?;
        Ok(AgentOutput::new(data))
    }

    fn validator(&self) -> &dyn OutputValidator {
        self.validator.as_ref()
    }

    fn fallback(&self, input: &serde_json::Value) -> Option<serde_json::Value> {
        self.fallback.as_ref().and_then(|fallback| fallback(input))
    }
}
