//! Pipeline builder with validation.

use super::orchestrator::Inner;
use super::{
    compile, CompiledPipeline, EngineConfig, FieldSource, InputProjection, Orchestrator, OrchestratorConfig,
    PipelineDefinition, ProjectedField, TaskNode,
};
use crate::agents::Agent;
use crate::cache::Cache;
use crate::completion::{CompletionClient, GuardedCompletionClient};
use crate::errors::ConfigurationError;
use crate::events::{EventSink, NoOpEventSink};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::utils::{system_clock, Clock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Assembles a pipeline definition, its agents and the shared resilience
/// instances into an [`Orchestrator`].
///
/// Unset collaborators are constructed from the [`EngineConfig`]: a fresh
/// in-memory cache, a breaker, a limiter and a no-op event sink. A
/// completion client, when supplied, is wrapped in a
/// [`GuardedCompletionClient`] sharing that breaker and limiter.
pub struct PipelineBuilder {
    definition: PipelineDefinition,
    agents: HashMap<String, Arc<dyn Agent>>,
    config: EngineConfig,
    cache: Option<Arc<Cache<serde_json::Value>>>,
    completion: Option<Arc<dyn CompletionClient>>,
    sink: Option<Arc<dyn EventSink>>,
    breaker: Option<Arc<CircuitBreaker>>,
    limiter: Option<Arc<RateLimiter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.definition.name)
            .field("tasks", &self.definition.tasks.len())
            .field("agents", &self.agents.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates a builder for an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_definition(PipelineDefinition::new(name))
    }

    /// Creates a builder from a declarative definition. Agents still have
    /// to be registered for every task.
    #[must_use]
    pub fn from_definition(definition: PipelineDefinition) -> Self {
        Self {
            definition,
            agents: HashMap::new(),
            config: EngineConfig::default(),
            cache: None,
            completion: None,
            sink: None,
            breaker: None,
            limiter: None,
            clock: None,
        }
    }

    /// Declares a task and registers the agent running it.
    #[must_use]
    pub fn task(mut self, node: TaskNode, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(node.name.clone(), agent);
        self.definition.tasks.push(node);
        self
    }

    /// Registers an agent for the task carrying its name.
    #[must_use]
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    /// Adds a projected field to `task`'s input.
    #[must_use]
    pub fn projection(mut self, task: impl Into<String>, field: ProjectedField) -> Self {
        let projections = std::mem::take(&mut self.definition.projections);
        self.definition.projections = projections.field(task, field);
        self
    }

    /// Replaces the projection table.
    #[must_use]
    pub fn projections(mut self, projections: InputProjection) -> Self {
        self.definition.projections = projections;
        self
    }

    /// Sets the orchestrator section of the configuration.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config.orchestrator = config;
        self
    }

    /// Sets the whole engine configuration.
    #[must_use]
    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an existing output cache, e.g. one loaded from a durable store.
    #[must_use]
    pub fn cache(mut self, cache: Arc<Cache<serde_json::Value>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the completion client agents reach through their context.
    #[must_use]
    pub fn completion_client(mut self, client: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(client);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Shares an existing circuit breaker.
    #[must_use]
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Shares an existing rate limiter.
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Sets the clock used by the cache and breaker the builder creates.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Returns the definition assembled so far.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Compiles the definition and assembles the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the configuration is invalid,
    /// the graph does not compile, a task has no agent, or a projection
    /// reads a task that is not upstream of its consumer.
    pub fn build(self) -> Result<Orchestrator, ConfigurationError> {
        self.config.validate()?;
        let pipeline = compile(&self.definition)?;

        for task in pipeline.tasks() {
            if !self.agents.contains_key(task.name()) {
                return Err(ConfigurationError::coded(
                    "CONFIG-MISSING_AGENT",
                    task.name(),
                    format!("No agent registered for task '{}'", task.name()),
                ));
            }
        }
        validate_projections(&pipeline, &self.definition.projections)?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let cache = match self.cache {
            Some(cache) => cache,
            None => Arc::new(Cache::with_clock(self.config.cache.clone(), Arc::clone(&clock))?),
        };
        let breaker = match self.breaker {
            Some(breaker) => breaker,
            None => Arc::new(CircuitBreaker::with_clock(
                format!("{}.completion", pipeline.name()),
                self.config.circuit_breaker.clone(),
                clock,
            )?),
        };
        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => Arc::new(RateLimiter::new(self.config.rate_limiter.clone())?),
        };
        let completion = self.completion.map(|client| {
            Arc::new(GuardedCompletionClient::new(
                client,
                Arc::clone(&limiter),
                Arc::clone(&breaker),
                self.config.retry.clone(),
            )) as Arc<dyn CompletionClient>
        });

        debug!(
            pipeline = %pipeline.name(),
            tasks = pipeline.len(),
            stages = pipeline.stages().len(),
            "Pipeline built"
        );

        Ok(Orchestrator::from_inner(Inner {
            pipeline,
            projections: self.definition.projections,
            agents: self.agents,
            config: self.config.orchestrator,
            cache,
            completion,
            sink: self.sink.unwrap_or_else(|| Arc::new(NoOpEventSink)),
            breaker,
            limiter,
        }))
    }
}

fn validate_projections(pipeline: &CompiledPipeline, projections: &InputProjection) -> Result<(), ConfigurationError> {
    for (task, fields) in projections.iter() {
        if pipeline.task(task).is_none() {
            return Err(ConfigurationError::coded(
                "CONFIG-PROJECTION",
                task,
                format!("Projection declared for unknown task '{task}'"),
            ));
        }
        let ancestors = pipeline.ancestors(task);
        for field in fields {
            if let FieldSource::Task(source) = &field.source {
                if !ancestors.contains(source) {
                    return Err(ConfigurationError::coded(
                        "CONFIG-PROJECTION",
                        task,
                        format!("Task '{task}' reads the output of '{source}', which is not upstream of it"),
                    )
                    .with_tasks(vec![task.to_string(), source.clone()]));
                }
            }
        }
    }
    Ok(())
}
