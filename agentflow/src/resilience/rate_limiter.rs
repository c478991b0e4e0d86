//! Token-bucket admission control in front of the completion service.
//!
//! Callers are never rejected, only delayed. A caller that finds the bucket
//! empty reserves the next token (the balance goes negative) and sleeps
//! until that token has been refilled, so concurrent waiters are admitted
//! in reservation order at exactly the refill rate.

use crate::errors::ConfigurationError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum number of tokens the bucket holds.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Tokens added per second.
    #[serde(default = "default_refill_rate")]
    pub refill_rate_per_second: f64,
}

fn default_capacity() -> u32 {
    10
}

fn default_refill_rate() -> f64 {
    1.0
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_rate_per_second: default_refill_rate(),
        }
    }
}

impl RateLimiterConfig {
    /// Creates a config with the given capacity and refill rate.
    #[must_use]
    pub fn new(capacity: u32, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
        }
    }

    /// Validates the config.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero capacity or a non-positive refill rate.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.capacity == 0 {
            return Err(ConfigurationError::new("Rate limiter capacity must be at least 1"));
        }
        if !(self.refill_rate_per_second.is_finite() && self.refill_rate_per_second > 0.0) {
            return Err(ConfigurationError::new(
                "Rate limiter refill rate must be a positive number",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill_at: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill_at = now;
    }
}

/// A token bucket shared by every task of a run.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a full bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.capacity),
                last_refill_at: Instant::now(),
            }),
            config,
        })
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Waits for a token and consumes it. Returns how long the caller waited.
    pub async fn acquire(&self) -> Duration {
        let wait = {
            let mut bucket = self.bucket.lock();
            bucket.refill(
                Instant::now(),
                f64::from(self.config.capacity),
                self.config.refill_rate_per_second,
            );
            let available = bucket.tokens;
            bucket.tokens -= 1.0;
            if available >= 1.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64((1.0 - available) / self.config.refill_rate_per_second)
            }
        };

        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Rate limiter delaying caller");
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Consumes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        bucket.refill(
            Instant::now(),
            f64::from(self.config.capacity),
            self.config.refill_rate_per_second,
        );
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Returns the tokens available right now, ignoring outstanding reservations.
    #[must_use]
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(
            Instant::now(),
            f64::from(self.config.capacity),
            self.config.refill_rate_per_second,
        );
        bucket.tokens.max(0.0)
    }
}
