//! A completion client behind the shared limiter, breaker and retry policy.

use super::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse};
use crate::resilience::{with_retry, CircuitBreaker, RateLimiter, RetryConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Wraps a [`CompletionClient`] so every attempt first waits for a rate
/// limiter token, then passes the circuit breaker.
///
/// Transient failures and circuit-open rejections are retried with
/// backoff. Invalid output counts as a healthy service response for the
/// breaker and is never retried.
#[derive(Debug, Clone)]
pub struct GuardedCompletionClient {
    inner: Arc<dyn CompletionClient>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

impl GuardedCompletionClient {
    /// Creates a guarded client.
    #[must_use]
    pub fn new(
        inner: Arc<dyn CompletionClient>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            inner,
            limiter,
            breaker,
            retry,
        }
    }

    /// Returns the shared circuit breaker.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        let waited = self.limiter.acquire().await;
        if !waited.is_zero() {
            debug!(task = %request.task, wait_ms = waited.as_millis() as u64, "Completion call rate limited");
        }

        self.breaker.admit().map_err(CompletionError::CircuitOpen)?;
        match self.inner.complete(request).await {
            Ok(response) => {
                self.breaker.record_success();
                Ok(response)
            }
            Err(err @ CompletionError::InvalidOutput(_)) => {
                self.breaker.record_success();
                Err(err)
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }
}

#[async_trait]
impl CompletionClient for GuardedCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        with_retry(&self.retry, &request.task, CompletionError::is_retryable, |_| {
            self.attempt(request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::MockCompletionClient;
    use crate::resilience::{CircuitBreakerConfig, CircuitState, JitterStrategy, RateLimiterConfig};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn guarded(inner: MockCompletionClient, retry: RetryConfig, failure_threshold: u32) -> GuardedCompletionClient {
        let limiter = RateLimiter::new(RateLimiterConfig::new(100, 100.0)).unwrap();
        let breaker = CircuitBreaker::new(
            "completion",
            CircuitBreakerConfig::default().with_failure_threshold(failure_threshold),
        )
        .unwrap();
        GuardedCompletionClient::new(Arc::new(inner), Arc::new(limiter), Arc::new(breaker), retry)
    }

    fn fast_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(5)
            .with_jitter(JitterStrategy::None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut inner = MockCompletionClient::new();
        inner.expect_complete().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CompletionError::Transient("timeout".to_string()))
            } else {
                Ok(CompletionResponse::new(json!({"ok": true})))
            }
        });

        let client = guarded(inner, fast_retry(3), 5);
        let response = client.complete(&CompletionRequest::new("outline", "p")).await.unwrap();

        assert_eq!(response.data, json!({"ok": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.breaker().snapshot().recent_failures, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut inner = MockCompletionClient::new();
        inner
            .expect_complete()
            .times(1)
            .returning(|_| Err(CompletionError::Permanent("bad request".to_string())));

        let client = guarded(inner, fast_retry(3), 5);
        let err = client.complete(&CompletionRequest::new("outline", "p")).await.unwrap_err();
        assert!(matches!(err, CompletionError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_invalid_output_does_not_trip_breaker() {
        let mut inner = MockCompletionClient::new();
        inner
            .expect_complete()
            .times(1)
            .returning(|_| Err(CompletionError::InvalidOutput(vec!["no title".to_string()])));

        let client = guarded(inner, fast_retry(3), 1);
        let err = client.complete(&CompletionRequest::new("outline", "p")).await.unwrap_err();
        assert!(matches!(err, CompletionError::InvalidOutput(_)));
        assert_eq!(client.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let mut inner = MockCompletionClient::new();
        inner
            .expect_complete()
            .times(2)
            .returning(|_| Err(CompletionError::Permanent("down".to_string())));

        let client = guarded(inner, RetryConfig::disabled(), 2);
        for _ in 0..2 {
            assert!(client.complete(&CompletionRequest::new("t", "p")).await.is_err());
        }
        assert_eq!(client.breaker().state(), CircuitState::Open);

        let err = client.complete(&CompletionRequest::new("t", "p")).await.unwrap_err();
        assert!(matches!(err, CompletionError::CircuitOpen(_)));
    }
}
