//! The stage executor.
//!
//! A run walks the compiled stages strictly in order. Within a stage the
//! runnable tasks are cut into batches of at most `max_parallel_agents`;
//! every member of a batch is spawned at once and the whole batch resolves
//! before the next one starts. Quality gate verdicts are evaluated once
//! the stage has fully resolved.

use super::{
    CompiledPipeline, InFlightPolicy, InputProjection, OrchestratorConfig, ProjectionMiss, RevisionInfo,
    RevisionPlan,
};
use crate::agents::{Agent, AgentContext, REVISION_INPUT_KEY};
use crate::cache::{task_cache_key, task_key_pattern, Cache, KeyValueStore};
use crate::completion::CompletionClient;
use crate::context::ExecutionContext;
use crate::core::{AgentOutput, QualityGateVerdict, TaskStatus};
use crate::errors::{
    PipelineError, PipelineResult, QualityGateFailure, StoreError, TaskError, TaskErrorKind, TaskExecutionError,
    UnmetDependencyError,
};
use crate::events::{EventSink, Progress, RunEmitter, TaskStatusEvent};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::utils::generate_run_id;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where a run saves its execution context when it ends.
///
/// The context is written whether the run succeeds or fails, so a
/// revision run can resume from it.
#[derive(Clone)]
pub struct Checkpoint {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Checkpoint {
    /// Saves under `key` in `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self { store, key: key.into() }
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the last saved context.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or holds a malformed context.
    pub async fn load(&self) -> Result<Option<ExecutionContext>, StoreError> {
        ExecutionContext::import_from(self.store.as_ref(), &self.key).await
    }

    async fn save(&self, context: &ExecutionContext) {
        if let Err(err) = context.export_to(self.store.as_ref(), &self.key).await {
            warn!(key = %self.key, error = %err, "Failed to save run checkpoint");
        }
    }
}

/// The inputs of one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// The run's initial inputs, read by root tasks and projections.
    pub initial_inputs: Value,
    /// Set to re-run the module guarded by a failed gate.
    pub revision: Option<RevisionInfo>,
    /// Context of the failed run. Only consulted by revision runs: tasks
    /// before the resume stage take their output from it.
    pub prior_context: Option<ExecutionContext>,
    /// Where to save this run's context when it ends.
    pub checkpoint: Option<Checkpoint>,
}

impl RunRequest {
    /// Creates a plain run.
    #[must_use]
    pub fn new(initial_inputs: Value) -> Self {
        Self {
            initial_inputs,
            ..Self::default()
        }
    }

    /// Turns the run into a revision run.
    #[must_use]
    pub fn with_revision(mut self, revision: RevisionInfo) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Supplies the context of the failed run.
    #[must_use]
    pub fn resume_from(mut self, context: ExecutionContext) -> Self {
        self.prior_context = Some(context);
        self
    }

    /// Saves the run's context to `checkpoint` when the run ends.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }
}

impl From<Value> for RunRequest {
    fn from(initial_inputs: Value) -> Self {
        Self::new(initial_inputs)
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The run id stamped on every event.
    pub run_id: Uuid,
    /// Outputs of terminal tasks (tasks nothing depends on).
    pub outputs: BTreeMap<String, Value>,
    /// Every recorded output and critique.
    pub context: ExecutionContext,
    /// Final status per task.
    pub statuses: BTreeMap<String, TaskStatus>,
    /// Tasks served from the cache.
    pub cache_hits: Vec<String>,
    /// Tasks restored from a prior context.
    pub restored: Vec<String>,
    /// Tasks skipped for an absent precondition.
    pub skipped: Vec<String>,
    /// Number of agent invocations.
    pub invocations: usize,
    /// Verdict per gate number.
    pub gate_verdicts: BTreeMap<u32, QualityGateVerdict>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl RunReport {
    /// Returns the recorded output of `task`.
    #[must_use]
    pub fn output(&self, task: &str) -> Option<&Value> {
        self.context.output(task)
    }
}

pub(crate) struct Inner {
    pub(crate) pipeline: CompiledPipeline,
    pub(crate) projections: InputProjection,
    pub(crate) agents: HashMap<String, Arc<dyn Agent>>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) cache: Arc<Cache<Value>>,
    pub(crate) completion: Option<Arc<dyn CompletionClient>>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) limiter: Arc<RateLimiter>,
}

/// Executes a compiled pipeline. Built with [`super::PipelineBuilder`].
///
/// Cloning is cheap; clones share the cache, breaker and limiter.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.inner.pipeline.name())
            .field("tasks", &self.inner.pipeline.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

struct Job {
    name: String,
    stage: usize,
    input: Value,
    cache_key: String,
    read_cache: bool,
    write_cache: bool,
    is_gate: bool,
}

struct Resolved {
    output: AgentOutput,
    cached: bool,
}

struct RunState {
    context: ExecutionContext,
    statuses: BTreeMap<String, TaskStatus>,
    cache_hits: Vec<String>,
    restored: Vec<String>,
    skipped: Vec<String>,
    invocations: usize,
    gate_verdicts: BTreeMap<u32, QualityGateVerdict>,
    progress: Progress,
}

impl RunState {
    fn new(pipeline: &CompiledPipeline) -> Self {
        Self {
            context: ExecutionContext::new(),
            statuses: pipeline
                .tasks()
                .iter()
                .map(|task| (task.name().to_string(), TaskStatus::Pending))
                .collect(),
            cache_hits: Vec::new(),
            restored: Vec::new(),
            skipped: Vec::new(),
            invocations: 0,
            gate_verdicts: BTreeMap::new(),
            progress: Progress {
                completed: 0,
                total: pipeline.len(),
            },
        }
    }

    fn is_skipped(&self, task: &str) -> bool {
        self.statuses.get(task) == Some(&TaskStatus::Skipped)
    }

    fn resolve(&mut self, emitter: &RunEmitter, event: &TaskStatusEvent) {
        self.statuses.insert(event.task.clone(), event.status);
        emitter.task(event);
        if event.status.is_resolved_ok() {
            self.progress.completed += 1;
            emitter.progress(self.progress);
        }
    }

    fn record(&mut self, task: &str, output: AgentOutput) {
        self.context.record_output(task, output.data);
        for mut critique in output.critiques {
            if critique.author.is_empty() {
                critique.author = task.to_string();
            }
            self.context.add_critique(critique);
        }
    }

    fn skip(&mut self, emitter: &RunEmitter, task: &str, stage: usize, reason: String) {
        info!(task = %task, stage, reason = %reason, "Task skipped");
        self.skipped.push(task.to_string());
        self.resolve(
            emitter,
            &TaskStatusEvent::new(task, stage, TaskStatus::Skipped).with_message(reason),
        );
    }
}

impl Orchestrator {
    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// Returns the compiled pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &CompiledPipeline {
        &self.inner.pipeline
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Returns the shared output cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<Cache<Value>> {
        &self.inner.cache
    }

    /// Returns the circuit breaker guarding the completion client.
    #[must_use]
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    /// Returns the rate limiter admitting completion calls.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    /// Drops every cached output of `task`. Returns the number removed.
    pub async fn invalidate_task(&self, task: &str) -> usize {
        self.inner.cache.invalidate(&task_key_pattern(task)).await
    }

    /// Runs the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first task failure, an unmet dependency, or the
    /// lowest-numbered failed quality gate of the stage that stopped the
    /// run. An unknown gate number in `request.revision` is a
    /// configuration error raised before any task runs.
    pub async fn execute(&self, request: impl Into<RunRequest>) -> PipelineResult<RunReport> {
        let request = request.into();
        let run_id = generate_run_id();
        let emitter = RunEmitter::new(run_id, Arc::clone(&self.inner.sink));
        let started = Instant::now();

        info!(
            run_id = %run_id,
            pipeline = %self.inner.pipeline.name(),
            tasks = self.inner.pipeline.len(),
            revision = ?request.revision.as_ref().map(|info| info.failed_gate_number),
            "Pipeline run started"
        );

        let result = self.run(&emitter, &request, started).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(report) => {
                info!(
                    run_id = %run_id,
                    duration_ms,
                    invocations = report.invocations,
                    cache_hits = report.cache_hits.len(),
                    "Pipeline run completed"
                );
                emitter.emit(
                    "pipeline.completed",
                    json!({
                        "duration_ms": duration_ms,
                        "invocations": report.invocations,
                        "cache_hits": report.cache_hits.len(),
                        "skipped": report.skipped,
                    }),
                );
            }
            Err(err) => {
                if err.as_quality_gate().is_some() {
                    warn!(run_id = %run_id, error = %err, "Pipeline run stopped at quality gate");
                } else {
                    error!(run_id = %run_id, error = %err, "Pipeline run failed");
                }
                emitter.emit(
                    "pipeline.failed",
                    json!({"duration_ms": duration_ms, "error": err.to_json()}),
                );
            }
        }
        result
    }

    async fn run(&self, emitter: &RunEmitter, request: &RunRequest, started: Instant) -> PipelineResult<RunReport> {
        let pipeline = &self.inner.pipeline;
        let plan = request
            .revision
            .as_ref()
            .map(|info| RevisionPlan::plan(pipeline, info))
            .transpose()?;
        if let Some(plan) = &plan {
            info!(
                gate = plan.gate_number,
                resume_stage = plan.resume_stage,
                module = ?plan.module_tasks,
                target = ?plan.target,
                "Revising module of failed quality gate"
            );
        }

        let mut state = RunState::new(pipeline);
        for task in pipeline.tasks() {
            emitter.task(&TaskStatusEvent::new(task.name(), task.stage, TaskStatus::Pending));
        }

        let outcome = self.run_stages(emitter, request, plan.as_ref(), &mut state).await;
        if let Some(checkpoint) = &request.checkpoint {
            checkpoint.save(&state.context).await;
        }
        outcome?;

        let outputs = pipeline
            .tasks()
            .iter()
            .filter(|task| {
                !pipeline
                    .tasks()
                    .iter()
                    .any(|other| other.dependencies.iter().any(|dep| dep == task.name()))
            })
            .filter_map(|task| {
                state
                    .context
                    .output(task.name())
                    .map(|output| (task.name().to_string(), output.clone()))
            })
            .collect();

        Ok(RunReport {
            run_id: emitter.run_id(),
            outputs,
            context: state.context,
            statuses: state.statuses,
            cache_hits: state.cache_hits,
            restored: state.restored,
            skipped: state.skipped,
            invocations: state.invocations,
            gate_verdicts: state.gate_verdicts,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn run_stages(
        &self,
        emitter: &RunEmitter,
        request: &RunRequest,
        plan: Option<&RevisionPlan>,
        state: &mut RunState,
    ) -> PipelineResult<()> {
        let batch_size = self.inner.config.max_parallel_agents.max(1);
        for (stage, names) in self.inner.pipeline.stages().iter().enumerate() {
            let stage_started = Instant::now();
            debug!(stage, tasks = ?names, "Stage started");
            emitter.emit("stage.started", json!({"stage": stage, "tasks": names}));

            let mut jobs = Vec::with_capacity(names.len());
            for name in names {
                if let Some(job) = self.prepare(emitter, request, plan, state, name, stage)? {
                    jobs.push(job);
                }
            }

            let mut jobs = jobs.into_iter().peekable();
            while jobs.peek().is_some() {
                let batch: Vec<Job> = jobs.by_ref().take(batch_size).collect();
                self.run_batch(emitter, state, batch).await?;
            }

            self.evaluate_gates(emitter, state, names, stage)?;

            let stage_ms = stage_started.elapsed().as_secs_f64() * 1000.0;
            debug!(stage, duration_ms = stage_ms, "Stage completed");
            emitter.emit("stage.completed", json!({"stage": stage, "duration_ms": stage_ms}));
        }
        Ok(())
    }

    /// Resolves `name` without running it where possible (restore or skip)
    /// and otherwise builds its job.
    fn prepare(
        &self,
        emitter: &RunEmitter,
        request: &RunRequest,
        plan: Option<&RevisionPlan>,
        state: &mut RunState,
        name: &str,
        stage: usize,
    ) -> PipelineResult<Option<Job>> {
        let Some(task) = self.inner.pipeline.task(name) else {
            return Ok(None);
        };

        if let (Some(plan), Some(prior)) = (plan, request.prior_context.as_ref()) {
            if stage < plan.resume_stage {
                if let Some(output) = prior.output(name) {
                    debug!(task = %name, stage, "Restored output from prior context");
                    state.context.record_output(name, output.clone());
                    state.restored.push(name.to_string());
                    state.resolve(emitter, &TaskStatusEvent::new(name, stage, TaskStatus::Success).restored());
                    return Ok(None);
                }
            }
        }

        if let Some(dep) = task.dependencies.iter().find(|dep| state.is_skipped(dep)) {
            state.skip(emitter, name, stage, format!("Dependency '{dep}' was skipped"));
            return Ok(None);
        }

        let base = match self
            .inner
            .projections
            .project(name, &task.dependencies, &request.initial_inputs, &state.context)
        {
            Ok(input) => input,
            Err(ProjectionMiss::MissingField { field }) => {
                state.skip(emitter, name, stage, format!("Required input '{field}' is absent"));
                return Ok(None);
            }
            Err(ProjectionMiss::MissingOutput { dependency }) => {
                return Err(UnmetDependencyError::new(name, dependency).into());
            }
        };

        // Keyed on the plain input so a revised output replaces the entry
        // a later plain run reads.
        let cache_key = task_cache_key(name, &base);
        let in_module = plan.is_some_and(|plan| plan.in_module(name));
        let input = match plan.filter(|plan| plan.is_target(name)) {
            Some(plan) => {
                let previous = plan
                    .previous_output
                    .clone()
                    .or_else(|| request.prior_context.as_ref().and_then(|prior| prior.output(name).cloned()))
                    .or_else(|| self.inner.cache.peek(&cache_key));
                attach_revision(base, plan.instructions(previous))
            }
            None => base,
        };

        let use_cache = self.inner.config.use_cache;
        Ok(Some(Job {
            name: name.to_string(),
            stage,
            input,
            cache_key,
            read_cache: use_cache && !in_module,
            write_cache: use_cache,
            is_gate: task.node.is_quality_gate(),
        }))
    }

    async fn run_batch(&self, emitter: &RunEmitter, state: &mut RunState, batch: Vec<Job>) -> PipelineResult<()> {
        let mut abort_handles = Vec::with_capacity(batch.len());
        let mut active = FuturesUnordered::new();

        for job in batch {
            let name = job.name.clone();
            let stage = job.stage;
            let handle = tokio::spawn(invoke(Arc::clone(&self.inner), emitter.clone(), job));
            abort_handles.push(handle.abort_handle());
            active.push(async move { (name, stage, handle.await) });
        }

        let mut first_failure: Option<TaskExecutionError> = None;
        while let Some((name, stage, joined)) = active.next().await {
            let (result, invoked) = match joined {
                Ok(result) => (result, true),
                Err(join_err) if join_err.is_cancelled() => {
                    let err = TaskError::other("Cancelled after a sibling task failed");
                    (Err(TaskExecutionError::from_task_error(&name, stage, err)), false)
                }
                Err(join_err) => {
                    let err = TaskError::new(TaskErrorKind::Panicked, join_err.to_string());
                    (Err(TaskExecutionError::from_task_error(&name, stage, err)), true)
                }
            };

            match result {
                Ok(Resolved { output, cached }) => {
                    let mut event = TaskStatusEvent::new(&name, stage, TaskStatus::Success);
                    if cached {
                        state.cache_hits.push(name.clone());
                        event = event.cached();
                    } else {
                        state.invocations += 1;
                    }
                    state.record(&name, output);
                    state.resolve(emitter, &event);
                }
                Err(err) => {
                    if invoked {
                        state.invocations += 1;
                    }
                    warn!(task = %name, stage, retryable = err.retryable, error = %err.message, "Task failed");
                    state.resolve(
                        emitter,
                        &TaskStatusEvent::new(&name, stage, TaskStatus::Error)
                            .with_message(err.message.clone())
                            .with_retryable(err.retryable),
                    );
                    if first_failure.is_none() {
                        if self.inner.config.in_flight_policy == InFlightPolicy::CancelOnFailure {
                            for handle in &abort_handles {
                                handle.abort();
                            }
                        }
                        first_failure = Some(err);
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(PipelineError::TaskExecution(err)),
            None => Ok(()),
        }
    }

    fn evaluate_gates(
        &self,
        emitter: &RunEmitter,
        state: &mut RunState,
        names: &[String],
        stage: usize,
    ) -> PipelineResult<()> {
        let mut failures = Vec::new();
        for name in names {
            let Some(number) = self.inner.pipeline.task(name).and_then(|task| task.node.gate_number()) else {
                continue;
            };
            let Some(output) = state.context.output(name) else {
                continue;
            };
            let verdict = QualityGateVerdict::from_output(output).map_err(|err| {
                TaskExecutionError::from_task_error(name, stage, missing_verdict(&err))
            })?;

            if verdict.passed {
                info!(gate = number, task = %name, score = verdict.score, "Quality gate passed");
                emitter.emit(
                    "quality_gate.passed",
                    json!({"gate_number": number, "task": name, "stage": stage, "score": verdict.score}),
                );
            } else {
                warn!(gate = number, task = %name, score = verdict.score, issues = ?verdict.issues_to_address, "Quality gate failed");
                emitter.emit(
                    "quality_gate.failed",
                    json!({
                        "gate_number": number,
                        "task": name,
                        "stage": stage,
                        "score": verdict.score,
                        "issues_to_address": verdict.issues_to_address,
                    }),
                );
                let previous_output = RevisionPlan::plan(
                    &self.inner.pipeline,
                    &RevisionInfo::new(number, verdict.issues_to_address.iter()),
                )
                .ok()
                .and_then(|plan| plan.target)
                .and_then(|target| state.context.output(&target).cloned());
                failures.push(QualityGateFailure {
                    gate_number: number,
                    task: name.clone(),
                    stage,
                    score: verdict.score,
                    issues_to_address: verdict.issues_to_address.clone(),
                    previous_output,
                });
            }
            state.gate_verdicts.insert(number, verdict);
        }

        let Some(failure) = failures.into_iter().min_by_key(|failure| failure.gate_number) else {
            return Ok(());
        };
        if self.inner.config.abort_on_gate_failure {
            return Err(failure.into());
        }
        warn!(gate = failure.gate_number, "Continuing past failed quality gate");
        Ok(())
    }
}

/// Runs one task: cache lookup, agent invocation, validation with
/// fallback, verdict check for gates and cache write.
async fn invoke(inner: Arc<Inner>, emitter: RunEmitter, job: Job) -> Result<Resolved, TaskExecutionError> {
    let fail = |err: TaskError| TaskExecutionError::from_task_error(&job.name, job.stage, err);

    if job.read_cache {
        if let Some(data) = inner.cache.get(&job.cache_key).await {
            debug!(task = %job.name, key = %job.cache_key, "Cache hit");
            return Ok(Resolved {
                output: AgentOutput::new(data),
                cached: true,
            });
        }
        debug!(task = %job.name, key = %job.cache_key, "Cache miss");
    }

    let agent = inner
        .agents
        .get(&job.name)
        .cloned()
        .ok_or_else(|| fail(TaskError::other(format!("No agent registered for task '{}'", job.name))))?;

    emitter.task(&TaskStatusEvent::new(&job.name, job.stage, TaskStatus::Running));
    let mut ctx = AgentContext::new(emitter.run_id(), &job.name, job.stage);
    if let Some(client) = &inner.completion {
        ctx = ctx.with_completion(Arc::clone(client));
    }

    let started = Instant::now();
    let outcome = AssertUnwindSafe(agent.run(&job.input, &ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(TaskError::new(TaskErrorKind::Panicked, panic_message(&*payload))));
    let output = accept(agent.as_ref(), &job.input, outcome).map_err(fail)?;

    if job.is_gate {
        QualityGateVerdict::from_output(&output.data).map_err(|err| fail(missing_verdict(&err)))?;
    }
    if job.write_cache {
        inner
            .cache
            .set(&job.cache_key, output.data.clone(), Some(inner.config.cache_ttl()))
            .await;
    }

    debug!(
        task = %job.name,
        stage = job.stage,
        duration_ms = started.elapsed().as_secs_f64() * 1000.0,
        "Task succeeded"
    );
    Ok(Resolved { output, cached: false })
}

/// Validates an agent outcome, falling back to the agent's deterministic
/// reconstruction when the output is rejected.
fn accept(
    agent: &dyn Agent,
    input: &Value,
    outcome: Result<AgentOutput, TaskError>,
) -> Result<AgentOutput, TaskError> {
    match outcome {
        Ok(output) => match agent.validator().validate(&output.data) {
            Ok(()) => Ok(output),
            Err(violations) => recover(agent, input, TaskError::validation(&violations)).map(|data| AgentOutput {
                data,
                critiques: output.critiques,
            }),
        },
        Err(err) if err.kind == TaskErrorKind::Validation => recover(agent, input, err).map(AgentOutput::new),
        Err(err) => Err(err),
    }
}

fn recover(agent: &dyn Agent, input: &Value, rejection: TaskError) -> Result<Value, TaskError> {
    let Some(fallback) = agent.fallback(input) else {
        return Err(rejection);
    };
    agent
        .validator()
        .validate(&fallback)
        .map_err(|violations| TaskError::validation(&violations))?;
    warn!(task = %agent.name(), reason = %rejection, "Output rejected, using fallback");
    Ok(fallback)
}

fn missing_verdict(err: &serde_json::Error) -> TaskError {
    TaskError::new(
        TaskErrorKind::Validation,
        format!("Quality gate output carries no verdict: {err}"),
    )
}

fn attach_revision(input: Value, instructions: Value) -> Value {
    let mut map = match input {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("input".to_string(), other);
            map
        }
    };
    map.insert(REVISION_INPUT_KEY.to_string(), instructions);
    Value::Object(map)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(|| "Task panicked".to_string(), |msg| format!("Task panicked: {msg}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::FnAgent;

    #[test]
    fn test_attach_revision_to_object_and_scalar() {
        let attached = attach_revision(json!({"premise": "heist"}), json!({"issues_to_address": ["x"]}));
        assert_eq!(attached["premise"], "heist");
        assert_eq!(attached["revision"]["issues_to_address"][0], "x");

        let wrapped = attach_revision(json!("raw"), json!({}));
        assert_eq!(wrapped["input"], "raw");
        assert!(wrapped.get("revision").is_some());
    }

    #[test]
    fn test_panic_message_variants() {
        let literal: Box<dyn std::any::Any + Send> = Box::new("boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let opaque: Box<dyn std::any::Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(&*literal), "Task panicked: boom");
        assert_eq!(panic_message(&*owned), "Task panicked: bang");
        assert_eq!(panic_message(&*opaque), "Task panicked");
    }

    #[test]
    fn test_accept_uses_fallback_on_rejected_output() {
        let agent = FnAgent::new("cast", |_input: Value| async move { Ok::<_, anyhow::Error>(json!({})) })
            .with_validator(crate::agents::OutputShape::object().required_array("names", 1))
            .with_fallback(|input: &Value| Some(json!({"names": [input["lead"].clone()]})));

        let output = accept(&agent, &json!({"lead": "Ada"}), Ok(AgentOutput::new(json!({"names": []})))).unwrap();
        assert_eq!(output.data, json!({"names": ["Ada"]}));
    }

    #[test]
    fn test_accept_without_fallback_reports_violations() {
        let agent = FnAgent::new("cast", |_input: Value| async move { Ok::<_, anyhow::Error>(json!({})) })
            .with_validator(crate::agents::OutputShape::object().required_array("names", 1));

        let err = accept(&agent, &json!({}), Ok(AgentOutput::new(json!({"names": []})))).unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Validation);
        assert!(!err.retryable);
    }

    #[test]
    fn test_accept_passes_through_transport_errors() {
        let agent = FnAgent::new("cast", |_input: Value| async move { Ok::<_, anyhow::Error>(json!({})) })
            .with_fallback(|_input: &Value| Some(json!({"names": ["x"]})));

        let err = accept(&agent, &json!({}), Err(TaskError::transport("503 unavailable"))).unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Transport);
        assert!(err.retryable);
    }
}
