//! Deterministic input fingerprints and task cache keys.
//!
//! The fingerprint is SHA-256 over canonical JSON (object keys sorted at
//! every depth), truncated to 128 bits. Two inputs that differ only in key
//! order share a fingerprint. A collision would produce a false cache hit;
//! nothing beyond cache lookup relies on fingerprint uniqueness.

use sha2::{Digest, Sha256};

/// Prefix of every task output cache key.
pub const TASK_KEY_PREFIX: &str = "task:";

/// Returns `value` with object keys sorted recursively.
#[must_use]
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Computes the fingerprint of a task input.
#[must_use]
pub fn fingerprint(input: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(&canonicalize(input)).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Builds the cache key `task:<name>:<fingerprint>`.
#[must_use]
pub fn task_cache_key(task: &str, input: &serde_json::Value) -> String {
    format!("{TASK_KEY_PREFIX}{task}:{}", fingerprint(input))
}

/// Builds the invalidation pattern matching every cached output of `task`.
#[must_use]
pub fn task_key_pattern(task: &str) -> String {
    format!("{TASK_KEY_PREFIX}{task}:*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let input = json!({"premise": "a lighthouse keeper", "tone": "bleak"});
        assert_eq!(fingerprint(&input), fingerprint(&input.clone()));
        assert_eq!(fingerprint(&input).len(), 32);
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": null}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"a": {"x": null, "y": [1, 2]}, "b": 1}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_respects_array_order_and_values() {
        assert_ne!(fingerprint(&json!([1, 2])), fingerprint(&json!([2, 1])));
        assert_ne!(fingerprint(&json!({"a": 1})), fingerprint(&json!({"a": 2})));
    }

    #[test]
    fn test_task_cache_key_shape() {
        let key = task_cache_key("outline", &json!({}));
        assert!(key.starts_with("task:outline:"));
        assert_ne!(key, task_cache_key("characters", &json!({})));
        assert_eq!(task_key_pattern("outline"), "task:outline:*");
    }
}
