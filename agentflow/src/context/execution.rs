//! The execution context of a pipeline run.

use crate::cache::KeyValueStore;
use crate::core::Critique;
use crate::errors::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Outputs and critiques accumulated during one run.
///
/// `outputs` only ever holds validated outputs of completed tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Last validated output per task.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Critiques filed against each task by downstream tasks.
    #[serde(default)]
    pub critiques: BTreeMap<String, Vec<Critique>>,
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the output of `task`, if it completed.
    #[must_use]
    pub fn output(&self, task: &str) -> Option<&serde_json::Value> {
        self.outputs.get(task)
    }

    /// Returns true if `task` has a recorded output.
    #[must_use]
    pub fn has_output(&self, task: &str) -> bool {
        self.outputs.contains_key(task)
    }

    /// Records the output of `task`, replacing any previous one.
    pub fn record_output(&mut self, task: impl Into<String>, output: serde_json::Value) {
        self.outputs.insert(task.into(), output);
    }

    /// Files a critique under its target.
    pub fn add_critique(&mut self, critique: Critique) {
        self.critiques
            .entry(critique.target.clone())
            .or_default()
            .push(critique);
    }

    /// Returns the critiques filed against `task`.
    #[must_use]
    pub fn critiques_for(&self, task: &str) -> &[Critique] {
        self.critiques.get(task).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the number of recorded outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Returns true if nothing has completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Serializes the context to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Writes the context to `store` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub async fn export_to(&self, store: &dyn KeyValueStore, key: &str) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(self)?;
        store.set(key, bytes).await?;
        debug!(key = %key, outputs = self.outputs.len(), "Exported execution context");
        Ok(())
    }

    /// Reads a context previously written with [`export_to`](Self::export_to).
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails or the bytes are not a context.
    pub async fn import_from(store: &dyn KeyValueStore, key: &str) -> Result<Option<Self>, StoreError> {
        let Some(bytes) = store.get(key).await? else {
            return Ok(None);
        };
        let context: Self = serde_json::from_slice(&bytes)?;
        debug!(key = %key, outputs = context.outputs.len(), "Imported execution context");
        Ok(Some(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryKeyValueStore;
    use crate::core::CritiqueSeverity;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_record_and_read_outputs() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.is_empty());

        ctx.record_output("outline", json!({"chapters": 3}));
        ctx.record_output("outline", json!({"chapters": 4}));

        assert_eq!(ctx.len(), 1);
        assert!(ctx.has_output("outline"));
        assert_eq!(ctx.output("outline"), Some(&json!({"chapters": 4})));
        assert_eq!(ctx.output("cast"), None);
    }

    #[test]
    fn test_critiques_filed_by_target() {
        let mut ctx = ExecutionContext::new();
        let mut critique = Critique::new("outline", "act two sags").with_severity(CritiqueSeverity::Major);
        critique.author = "world_bible".to_string();
        ctx.add_critique(critique.clone());
        ctx.add_critique(Critique::new("outline", "typo in title"));

        assert_eq!(ctx.critiques_for("outline").len(), 2);
        assert_eq!(ctx.critiques_for("outline")[0], critique);
        assert!(ctx.critiques_for("cast").is_empty());
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let store = InMemoryKeyValueStore::new();
        let mut ctx = ExecutionContext::new();
        ctx.record_output("a", json!({"v": 1}));
        ctx.add_critique(Critique::new("a", "thin"));

        ctx.export_to(&store, "state:run-1").await.unwrap();
        let restored = ExecutionContext::import_from(&store, "state:run-1").await.unwrap();

        assert_eq!(restored, Some(ctx));
        assert_eq!(ExecutionContext::import_from(&store, "state:none").await.unwrap(), None);
    }

    #[test]
    fn test_import_rejects_garbage() {
        let store = InMemoryKeyValueStore::new();
        let err = tokio_test::block_on(async {
            store.set("state:bad", b"not json".to_vec()).await.unwrap();
            ExecutionContext::import_from(&store, "state:bad").await
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
