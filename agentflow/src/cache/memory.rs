//! TTL + LRU cache with an optional durable mirror.

use super::{CacheEntry, KeyValueStore};
use crate::errors::{ConfigurationError, PipelineError};
use crate::utils::{system_clock, Clock, Timestamp};
use parking_lot::Mutex;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for a [`Cache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live entries.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// TTL applied when `set` is called without one.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Key prefix used for entries mirrored into the durable store.
    #[serde(default = "default_persist_prefix")]
    pub persist_prefix: String,
}

fn default_max_size() -> usize {
    1000
}

fn default_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_persist_prefix() -> String {
    "cache:".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            default_ttl_ms: default_ttl_ms(),
            persist_prefix: default_persist_prefix(),
        }
    }
}

impl CacheConfig {
    /// Sets the maximum size.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the default TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Returns the default TTL.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Validates the config.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_size` is zero.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_size == 0 {
            return Err(ConfigurationError::new("Cache max_size must be at least 1"));
        }
        Ok(())
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads that returned a value.
    pub hits: u64,
    /// Reads that returned nothing (including expired entries).
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because their TTL lapsed.
    pub expirations: u64,
    /// Live entries.
    pub size: usize,
}

#[derive(Debug)]
struct Slot<T> {
    entry: CacheEntry<T>,
    tick: u64,
    version: u64,
}

#[derive(Debug)]
struct CacheState<T> {
    entries: HashMap<String, Slot<T>>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    stats: CacheStats,
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            stats: CacheStats::default(),
        }
    }
}

impl<T> CacheState<T> {
    fn bump(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    /// Inserts `entry` and returns the version identifying this write.
    fn insert(&mut self, entry: CacheEntry<T>) -> u64 {
        let key = entry.key.clone();
        self.remove(&key);
        let tick = self.next_tick;
        self.next_tick += 1;
        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            Slot {
                entry,
                tick,
                version: tick,
            },
        );
        tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot.entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        self.stats.evictions += 1;
        Some(key)
    }
}

/// A content-addressable cache of task outputs.
///
/// Expiry is lazy: `get` checks the TTL and deletes an expired entry it
/// finds. `set` evicts the least recently used entry when full. All
/// mutations are serialized through an internal mutex that is never held
/// across an await point. Mirroring to the durable store is best-effort:
/// store failures are logged and never surface to callers.
pub struct Cache<T> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<T>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl<T> std::fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("size", &self.state.lock().entries.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl<T> Cache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Creates an in-memory cache on the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigurationError> {
        Self::with_clock(config, system_clock())
    }

    /// Creates an in-memory cache reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            state: Mutex::new(CacheState::default()),
            store: None,
        })
    }

    /// Creates a cache mirrored to `store`, eagerly loading every entry
    /// in the store that has not expired yet. Expired entries found during
    /// the load are deleted from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the store cannot be listed.
    pub async fn with_store(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, PipelineError> {
        let mut cache = Self::with_clock(config, clock)?;
        let now = cache.clock.now();
        let prefix = cache.config.persist_prefix.clone();

        let mut loaded: Vec<CacheEntry<T>> = Vec::new();
        for persisted_key in store.list_keys(&prefix).await? {
            let bytes = match store.get(&persisted_key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    warn!(key = %persisted_key, error = %err, "Failed to read persisted cache entry");
                    continue;
                }
            };
            match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
                Ok(entry) if entry.is_expired(now) => {
                    if let Err(err) = store.delete(&persisted_key).await {
                        warn!(key = %persisted_key, error = %err, "Failed to drop expired persisted entry");
                    }
                }
                Ok(entry) => loaded.push(entry),
                Err(err) => {
                    warn!(key = %persisted_key, error = %err, "Skipping undecodable persisted cache entry");
                }
            }
        }

        loaded.sort_by_key(|entry| entry.last_accessed_at);
        let count = loaded.len();
        {
            let state = cache.state.get_mut();
            for entry in loaded {
                if state.entries.len() >= cache.config.max_size && !state.entries.contains_key(&entry.key) {
                    state.evict_lru();
                }
                let _ = state.insert(entry);
            }
            state.stats.evictions = 0;
        }
        debug!(loaded = count, "Loaded persisted cache entries");

        cache.store = Some(store);
        Ok(cache)
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the live value for `key`, refreshing its access metadata.
    ///
    /// An expired entry is deleted as a side effect and reported as absent.
    pub async fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        {
            let mut state = self.state.lock();
            let Some(expired) = state.entries.get(key).map(|slot| slot.entry.is_expired(now)) else {
                state.stats.misses += 1;
                return None;
            };
            if !expired {
                let value = state.entries.get_mut(key).map(|slot| {
                    slot.entry.touch(now);
                    slot.entry.value.clone()
                });
                state.bump(key);
                state.stats.hits += 1;
                return value;
            }
            state.remove(key);
            state.stats.misses += 1;
            state.stats.expirations += 1;
        }

        debug!(key = %key, "Cache entry expired");
        self.unmirror(key).await;
        None
    }

    /// Returns the live value for `key` without touching recency or stats.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .filter(|slot| !slot.entry.is_expired(now))
            .map(|slot| slot.entry.value.clone())
    }

    /// Stores `value` under `key` with `ttl` (or the default TTL).
    ///
    /// Evicts the least recently used entry first if the cache is full.
    /// The durable copy always ends up matching memory: if the entry is
    /// deleted or replaced while its mirror write is in flight, the store
    /// is brought back in line afterwards.
    pub async fn set(&self, key: &str, value: T, ttl: Option<Duration>) {
        let now = self.clock.now();
        let entry = CacheEntry::new(key, value, ttl.unwrap_or_else(|| self.config.default_ttl()), now);

        let (evicted, version) = {
            let mut state = self.state.lock();
            let evicted = if !state.entries.contains_key(key) && state.entries.len() >= self.config.max_size {
                state.evict_lru()
            } else {
                None
            };
            let version = state.insert(entry.clone());
            (evicted, version)
        };

        if let Some(evicted) = evicted {
            debug!(key = %evicted, "Evicted least recently used cache entry");
            self.unmirror(&evicted).await;
        }
        if self.store.is_none() {
            return;
        }
        self.mirror(&entry).await;

        let current = {
            let state = self.state.lock();
            match state.entries.get(key) {
                Some(slot) if slot.version == version => return,
                Some(slot) => Some(slot.entry.clone()),
                None => None,
            }
        };
        match current {
            Some(newer) => {
                debug!(key = %key, "Cache entry replaced during mirror write");
                self.mirror(&newer).await;
            }
            None => {
                debug!(key = %key, "Cache entry removed during mirror write");
                self.unmirror(key).await;
            }
        }
    }

    /// Removes `key`. Returns true if a live or expired entry existed.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.state.lock().remove(key).is_some();
        if removed {
            self.unmirror(key).await;
        }
        removed
    }

    /// Removes every key matching `pattern`, where `*` matches any run of
    /// characters. Returns the number of entries removed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let matcher = match glob_to_regex(pattern) {
            Ok(matcher) => matcher,
            Err(err) => {
                warn!(pattern = %pattern, error = %err, "Invalid invalidation pattern");
                return 0;
            }
        };
        let removed: Vec<String> = {
            let mut state = self.state.lock();
            let keys: Vec<String> = state
                .entries
                .keys()
                .filter(|key| matcher.is_match(key))
                .cloned()
                .collect();
            for key in &keys {
                state.remove(key);
            }
            keys
        };

        for key in &removed {
            self.unmirror(key).await;
        }
        debug!(pattern = %pattern, removed = removed.len(), "Invalidated cache entries");
        removed.len()
    }

    /// Removes every expired entry. Returns the number removed.
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = {
            let mut state = self.state.lock();
            let keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, slot)| slot.entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                state.remove(key);
            }
            state.stats.expirations += keys.len() as u64;
            keys
        };

        for key in &expired {
            self.unmirror(key).await;
        }
        expired.len()
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        let keys: Vec<String> = {
            let mut state = self.state.lock();
            let keys = state.entries.keys().cloned().collect();
            state.entries.clear();
            state.recency.clear();
            keys
        };
        for key in &keys {
            self.unmirror(key).await;
        }
    }

    /// Returns the number of entries held, including not-yet-discovered expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            size: state.entries.len(),
            ..state.stats
        }
    }

    /// Returns the full entry for `key`, for inspection.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<CacheEntry<T>> {
        self.state.lock().entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Returns the time the cache reads as "now".
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn persisted_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.persist_prefix)
    }

    async fn mirror(&self, entry: &CacheEntry<T>) {
        let Some(store) = &self.store else {
            return;
        };
        match serde_json::to_vec(entry) {
            Ok(bytes) => {
                if let Err(err) = store.set(&self.persisted_key(&entry.key), bytes).await {
                    warn!(key = %entry.key, error = %err, "Failed to mirror cache entry");
                }
            }
            Err(err) => warn!(key = %entry.key, error = %err, "Failed to encode cache entry"),
        }
    }

    async fn unmirror(&self, key: &str) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.delete(&self.persisted_key(key)).await {
            warn!(key = %key, error = %err, "Failed to delete mirrored cache entry");
        }
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
}
