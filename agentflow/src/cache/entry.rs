//! Cache entries.

use crate::utils::{elapsed_between, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached value with its expiry and access metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cache key.
    pub key: String,
    /// The cached value.
    pub value: T,
    /// When the entry was written.
    pub created_at: Timestamp,
    /// Time to live in milliseconds.
    pub ttl_ms: u64,
    /// Number of cache hits served by this entry.
    pub access_count: u64,
    /// When the entry was last written or read.
    pub last_accessed_at: Timestamp,
}

impl<T> CacheEntry<T> {
    /// Creates a fresh entry.
    #[must_use]
    pub fn new(key: impl Into<String>, value: T, ttl: Duration, now: Timestamp) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            access_count: 0,
            last_accessed_at: now,
        }
    }

    /// Returns the time to live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Returns true once more than `ttl` has passed since creation.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        elapsed_between(self.created_at, now) > self.ttl()
    }

    /// Records a cache hit.
    pub fn touch(&mut self, now: Timestamp) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}
