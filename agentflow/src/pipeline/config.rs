//! Orchestrator and engine configuration.

use crate::cache::CacheConfig;
use crate::errors::ConfigurationError;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to the other tasks of a batch when one of them fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightPolicy {
    /// Wait for every sibling so their outputs are cached for a later run.
    #[default]
    LetFinish,
    /// Abort the siblings as soon as one task fails.
    CancelOnFailure,
}

/// Configuration of one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum tasks running at once within a stage.
    #[serde(default = "default_max_parallel_agents")]
    pub max_parallel_agents: usize,
    /// Whether task outputs are read from and written to the cache.
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Whether a failed quality gate stops the run.
    #[serde(default = "default_true")]
    pub abort_on_gate_failure: bool,
    /// Sibling handling when a task fails.
    #[serde(default)]
    pub in_flight_policy: InFlightPolicy,
    /// TTL of cached task outputs in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

fn default_max_parallel_agents() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: default_max_parallel_agents(),
            use_cache: true,
            abort_on_gate_failure: true,
            in_flight_policy: InFlightPolicy::default(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the concurrency cap.
    #[must_use]
    pub fn with_max_parallel_agents(mut self, max: usize) -> Self {
        self.max_parallel_agents = max;
        self
    }

    /// Enables or disables caching.
    #[must_use]
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    /// Enables or disables aborting on a failed gate.
    #[must_use]
    pub fn with_abort_on_gate_failure(mut self, abort: bool) -> Self {
        self.abort_on_gate_failure = abort;
        self
    }

    /// Sets the in-flight policy.
    #[must_use]
    pub fn with_in_flight_policy(mut self, policy: InFlightPolicy) -> Self {
        self.in_flight_policy = policy;
        self
    }

    /// Sets the cache TTL for task outputs.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Returns the cache TTL for task outputs.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Validates the config.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_parallel_agents` is zero.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_parallel_agents == 0 {
            return Err(ConfigurationError::new("max_parallel_agents must be at least 1"));
        }
        Ok(())
    }
}

/// Every tunable of an engine in one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Circuit breaker settings.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Rate limiter settings.
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    /// Completion retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Parses and validates a JSON document. Missing sections and fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or a value is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| ConfigurationError::new(format!("Invalid engine configuration: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid section's error.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.orchestrator.validate()?;
        self.cache.validate()?;
        self.circuit_breaker.validate()?;
        self.rate_limiter.validate()?;
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_orchestrator_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_parallel_agents, 3);
        assert!(config.use_cache);
        assert!(config.abort_on_gate_failure);
        assert_eq!(config.in_flight_policy, InFlightPolicy::LetFinish);
        assert_eq!(config.cache_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_engine_config_partial_document() {
        let config = EngineConfig::from_json_str(
            r#"{
                "orchestrator": {"max_parallel_agents": 5, "in_flight_policy": "cancel_on_failure"},
                "rate_limiter": {"capacity": 4},
                "retry": {"max_attempts": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.max_parallel_agents, 5);
        assert_eq!(config.orchestrator.in_flight_policy, InFlightPolicy::CancelOnFailure);
        assert!(config.orchestrator.use_cache);
        assert_eq!(config.rate_limiter.capacity, 4);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
    }

    #[test]
    fn test_engine_config_rejects_invalid_values() {
        assert!(EngineConfig::from_json_str(r#"{"orchestrator": {"max_parallel_agents": 0}}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"rate_limiter": {"refill_rate_per_second": 0.0}}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"circuit_breaker": {"failure_threshold": 0}}"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
