//! Mock agents and completion clients for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{AcceptAll, Agent, AgentContext, OutputValidator};
use crate::completion::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse};
use crate::core::AgentOutput;
use crate::errors::TaskError;

/// Tracks how many agents run at the same time.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    /// Creates a shared gauge.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the highest number of simultaneous runs observed.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns the number of runs in flight.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard { gauge: self }
    }
}

struct GaugeGuard<'a> {
    gauge: &'a ConcurrencyGauge,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A scripted agent that records every input it receives.
///
/// Scripted results are consumed in order; once the script is exhausted
/// every call returns the default result, `{"task": <name>}` unless set.
#[derive(Debug)]
pub struct MockAgent {
    name: String,
    script: Mutex<VecDeque<Result<AgentOutput, TaskError>>>,
    default: Mutex<Result<AgentOutput, TaskError>>,
    inputs: Mutex<Vec<serde_json::Value>>,
    delay: Option<Duration>,
    gauge: Option<Arc<ConcurrencyGauge>>,
    panic_message: Option<String>,
    validator: Box<dyn OutputValidator>,
    fallback: Option<serde_json::Value>,
}

impl MockAgent {
    /// Creates an agent answering `{"task": <name>}`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let default = Ok(AgentOutput::new(serde_json::json!({ "task": name.clone() })));
        Self {
            name,
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(default),
            inputs: Mutex::new(Vec::new()),
            delay: None,
            gauge: None,
            panic_message: None,
            validator: Box::new(AcceptAll),
            fallback: None,
        }
    }

    /// Sets the default output.
    #[must_use]
    pub fn returning(self, data: serde_json::Value) -> Self {
        *self.default.lock() = Ok(AgentOutput::new(data));
        self
    }

    /// Sets the default result to an error.
    #[must_use]
    pub fn failing(self, err: TaskError) -> Self {
        *self.default.lock() = Err(err);
        self
    }

    /// Queues a one-off result ahead of the default.
    #[must_use]
    pub fn then(self, result: Result<AgentOutput, TaskError>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Sleeps for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reports every run to `gauge`.
    #[must_use]
    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Panics with `message` instead of answering.
    #[must_use]
    pub fn panicking(mut self, message: impl Into<String>) -> Self {
        self.panic_message = Some(message.into());
        self
    }

    /// Sets the output validator.
    #[must_use]
    pub fn with_validator(mut self, validator: impl OutputValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Sets a constant fallback output.
    #[must_use]
    pub fn with_fallback(mut self, fallback: serde_json::Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Returns the number of runs.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns every input received, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<serde_json::Value> {
        self.inputs.lock().clone()
    }

    /// Returns the most recent input.
    #[must_use]
    pub fn last_input(&self) -> Option<serde_json::Value> {
        self.inputs.lock().last().cloned()
    }

    /// Clears recorded inputs.
    pub fn reset(&self) {
        self.inputs.lock().clear();
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &serde_json::Value, _ctx: &AgentContext) -> Result<AgentOutput, TaskError> {
        self.inputs.lock().push(input.clone());
        let _guard = self.gauge.as_deref().map(ConcurrencyGauge::enter);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.panic_message {
            panic!("{message}");
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.default.lock().clone())
    }

    fn validator(&self) -> &dyn OutputValidator {
        self.validator.as_ref()
    }

    fn fallback(&self, _input: &serde_json::Value) -> Option<serde_json::Value> {
        self.fallback.clone()
    }
}

/// A completion client answering from a script.
///
/// Scripted results are consumed in order; afterwards every call returns
/// the default response.
#[derive(Debug)]
pub struct ScriptedCompletionClient {
    script: Mutex<VecDeque<Result<CompletionResponse, CompletionError>>>,
    default: serde_json::Value,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionClient {
    /// Creates a client whose default response carries `data`.
    #[must_use]
    pub fn new(default: serde_json::Value) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a one-off result ahead of the default.
    #[must_use]
    pub fn then(self, result: Result<CompletionResponse, CompletionError>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns every request received, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        self.requests.lock().push(request.clone());
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(CompletionResponse::new(self.default.clone())))
    }
}
