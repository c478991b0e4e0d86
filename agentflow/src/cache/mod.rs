//! Task output caching.
//!
//! - [`Cache`]: TTL + LRU store with an optional durable mirror
//! - [`KeyValueStore`]: byte-level persistence backing the mirror
//! - [`fingerprint`] / [`task_cache_key`]: deterministic cache keys

mod entry;
mod fingerprint;
mod memory;
mod store;

pub use entry::CacheEntry;
pub use fingerprint::{canonicalize, fingerprint, task_cache_key, task_key_pattern, TASK_KEY_PREFIX};
pub use memory::{Cache, CacheConfig, CacheStats};
#[cfg(test)]
pub use store::MockKeyValueStore;
pub use store::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
