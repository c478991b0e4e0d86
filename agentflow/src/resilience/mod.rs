//! Protection for the downstream completion service: admission control,
//! failure isolation and bounded retries.
//!
//! The limiter and breaker are constructed once per engine and shared by every
//! task of a run; their state lives behind internal mutexes.

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{with_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryState};
