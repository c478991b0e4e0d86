//! Three-state circuit breaker around the completion service.
//!
//! State changes are evaluated lazily on call attempts and outcomes; there
//! is no background timer.

use crate::errors::{CircuitOpenError, ConfigurationError};
use crate::utils::{elapsed_between, system_clock, Clock, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through; failures are counted.
    #[default]
    Closed,
    /// Calls are rejected until the open timeout elapses.
    Open,
    /// Trial calls are admitted; one failure re-opens.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring window that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time after the last failure before a trial call is admitted.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    /// Window over which failures are counted.
    #[serde(default = "default_monitoring_window_ms")]
    pub monitoring_window_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_open_timeout_ms() -> u64 {
    60_000
}

fn default_monitoring_window_ms() -> u64 {
    120_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            open_timeout_ms: default_open_timeout_ms(),
            monitoring_window_ms: default_monitoring_window_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the success threshold.
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Sets the open timeout.
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the monitoring window.
    #[must_use]
    pub fn with_monitoring_window(mut self, window: Duration) -> Self {
        self.monitoring_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Returns the open timeout.
    #[must_use]
    pub const fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Returns the monitoring window.
    #[must_use]
    pub const fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }

    /// Validates the config.
    ///
    /// # Errors
    ///
    /// Returns an error if either threshold is zero.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(ConfigurationError::new(
                "Circuit breaker thresholds must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// The call was rejected without invoking the operation.
    #[error("{0}")]
    Open(CircuitOpenError),
    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Failures inside the monitoring window.
    pub recent_failures: usize,
    /// Consecutive successes while half-open.
    pub consecutive_successes: u32,
    /// Time of the last failure.
    pub last_failure_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failures: VecDeque<Timestamp>,
    consecutive_successes: u32,
    last_failure_at: Option<Timestamp>,
}

impl BreakerState {
    fn prune(&mut self, now: Timestamp, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if elapsed_between(*oldest, now) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A circuit breaker shared by every task of a run.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker using the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigurationError> {
        Self::with_clock(name, config, system_clock())
    }

    /// Creates a closed breaker reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerState::default()),
        })
    }

    /// Returns the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the state as of the last call attempt or outcome.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns a snapshot of the breaker's bookkeeping.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        inner.prune(self.clock.now(), self.config.monitoring_window());
        BreakerSnapshot {
            state: inner.state,
            recent_failures: inner.failures.len(),
            consecutive_successes: inner.consecutive_successes,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Forces the breaker back to closed and forgets all failures.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::default();
        info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Runs `operation` under breaker protection.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without invoking the operation while
    /// the circuit is open, or [`BreakerError::Inner`] when it fails.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit().map_err(BreakerError::Open)?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Decides whether a call may proceed, moving OPEN to HALF_OPEN once the
    /// open timeout has elapsed since the last failure.
    ///
    /// # Errors
    ///
    /// Returns the remaining cooldown while the circuit is open.
    pub fn admit(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let now = self.clock.now();
        let since_failure = inner
            .last_failure_at
            .map_or(Duration::MAX, |at| elapsed_between(at, now));
        let timeout = self.config.open_timeout();

        if since_failure >= timeout {
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
            info!(breaker = %self.name, "Circuit breaker half-open; admitting trial call");
            Ok(())
        } else {
            Err(CircuitOpenError {
                retry_after: timeout - since_failure,
            })
        }
    }

    /// Records a successful call outcome.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures.clear();
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.consecutive_successes = 0;
                    info!(breaker = %self.name, "Circuit breaker closed");
                }
            }
            // A late success from a call admitted before the circuit re-opened.
            CircuitState::Open => {}
        }
    }

    /// Records a failed call outcome.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(now);
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                inner.prune(now, self.config.monitoring_window());
                let threshold = self.config.failure_threshold as usize;
                if inner.failures.len() >= threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures.len(),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.consecutive_successes = 0;
                warn!(breaker = %self.name, "Trial call failed; circuit breaker re-opened");
            }
            CircuitState::Open => {}
        }
    }
}
