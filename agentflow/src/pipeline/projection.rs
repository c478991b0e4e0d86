//! The input projection table.
//!
//! Each task reads a fixed subset of the initial inputs and of upstream
//! outputs. The table maps a task name to the fields it needs; tasks
//! without an entry get a default projection (see [`InputProjection::project`]).

use crate::context::ExecutionContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a projected field is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    /// A top-level key of the run's initial inputs.
    Initial(String),
    /// The output of an upstream task.
    Task(String),
}

impl FieldSource {
    fn name(&self) -> &str {
        match self {
            Self::Initial(name) | Self::Task(name) => name,
        }
    }
}

/// One field of a task's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedField {
    /// Where to read from.
    pub source: FieldSource,
    /// JSON pointer into the source value (`/characters/0/name`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    /// Key in the projected input. Defaults to the source name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Whether the task cannot run without this field.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ProjectedField {
    /// Reads the initial input `key`.
    #[must_use]
    pub fn initial(key: impl Into<String>) -> Self {
        Self::from_source(FieldSource::Initial(key.into()))
    }

    /// Reads the output of `task`.
    #[must_use]
    pub fn task(task: impl Into<String>) -> Self {
        Self::from_source(FieldSource::Task(task.into()))
    }

    fn from_source(source: FieldSource) -> Self {
        Self {
            source,
            pointer: None,
            alias: None,
            required: true,
        }
    }

    /// Narrows the value with a JSON pointer.
    #[must_use]
    pub fn at(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    /// Sets the key the value is stored under.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Marks the field optional; a missing value is simply omitted.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Returns the key this field is stored under.
    #[must_use]
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.source.name())
    }
}

/// Why a task's input could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionMiss {
    /// A required field is absent from the initial inputs or from an
    /// upstream output. The task is skipped, not failed.
    MissingField {
        /// The missing field's key in the projected input.
        field: String,
    },
    /// An upstream task has no recorded output.
    MissingOutput {
        /// The dependency without output.
        dependency: String,
    },
}

/// Task name to projected fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputProjection {
    rules: BTreeMap<String, Vec<ProjectedField>>,
}

impl InputProjection {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field to `task`'s projection.
    #[must_use]
    pub fn field(mut self, task: impl Into<String>, field: ProjectedField) -> Self {
        self.rules.entry(task.into()).or_default().push(field);
        self
    }

    /// Returns the fields projected for `task`.
    #[must_use]
    pub fn rule(&self, task: &str) -> Option<&[ProjectedField]> {
        self.rules.get(task).map(Vec::as_slice)
    }

    /// Iterates over `(task, fields)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ProjectedField])> {
        self.rules.iter().map(|(task, fields)| (task.as_str(), fields.as_slice()))
    }

    /// Builds the input of `task`.
    ///
    /// Without a table entry, a task with no dependencies receives the
    /// initial inputs unchanged, and any other task receives an object of
    /// its dependencies' outputs keyed by dependency name.
    ///
    /// # Errors
    ///
    /// Returns the first missing piece of input.
    pub fn project(
        &self,
        task: &str,
        dependencies: &[String],
        initial: &serde_json::Value,
        context: &ExecutionContext,
    ) -> Result<serde_json::Value, ProjectionMiss> {
        let Some(fields) = self.rules.get(task) else {
            if dependencies.is_empty() {
                return Ok(initial.clone());
            }
            let mut input = serde_json::Map::new();
            for dep in dependencies {
                let output = context.output(dep).ok_or_else(|| ProjectionMiss::MissingOutput {
                    dependency: dep.clone(),
                })?;
                input.insert(dep.clone(), output.clone());
            }
            return Ok(serde_json::Value::Object(input));
        };

        for dep in dependencies {
            if !context.has_output(dep) {
                return Err(ProjectionMiss::MissingOutput {
                    dependency: dep.clone(),
                });
            }
        }

        let mut input = serde_json::Map::new();
        for field in fields {
            let source = match &field.source {
                FieldSource::Initial(key) => initial.get(key),
                FieldSource::Task(name) => Some(context.output(name).ok_or_else(|| {
                    ProjectionMiss::MissingOutput {
                        dependency: name.clone(),
                    }
                })?),
            };
            let value = match (&field.pointer, source) {
                (Some(pointer), Some(value)) => value.pointer(pointer),
                (None, value) => value,
                (Some(_), None) => None,
            };

            match value {
                Some(value) if !value.is_null() || !field.required => {
                    input.insert(field.key().to_string(), value.clone());
                }
                _ if field.required => {
                    return Err(ProjectionMiss::MissingField {
                        field: field.key().to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(serde_json::Value::Object(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.record_output("outline", json!({"chapters": [{"title": "One"}], "tone": "dry"}));
        ctx.record_output("cast", json!({"names": ["Ada"]}));
        ctx
    }

    #[test]
    fn test_default_projection_root_gets_initial_inputs() {
        let table = InputProjection::new();
        let initial = json!({"premise": "heist"});
        let input = table.project("premise", &[], &initial, &ExecutionContext::new()).unwrap();
        assert_eq!(input, initial);
    }

    #[test]
    fn test_default_projection_keys_outputs_by_dependency() {
        let table = InputProjection::new();
        let deps = vec!["outline".to_string(), "cast".to_string()];
        let input = table.project("bible", &deps, &json!({}), &context()).unwrap();
        assert_eq!(input["cast"], json!({"names": ["Ada"]}));
        assert_eq!(input["outline"]["tone"], json!("dry"));
    }

    #[test]
    fn test_table_projection_with_pointer_and_alias() {
        let table = InputProjection::new()
            .field("scene", ProjectedField::task("outline").at("/chapters/0/title").alias("chapter"))
            .field("scene", ProjectedField::initial("style"))
            .field("scene", ProjectedField::initial("length").optional());

        let input = table
            .project("scene", &["outline".to_string()], &json!({"style": "noir"}), &context())
            .unwrap();
        assert_eq!(input, json!({"chapter": "One", "style": "noir"}));
    }

    #[test]
    fn test_missing_required_initial_field() {
        let table = InputProjection::new().field("epilogue", ProjectedField::initial("epilogue_notes"));
        let miss = table
            .project("epilogue", &[], &json!({}), &ExecutionContext::new())
            .unwrap_err();
        assert_eq!(
            miss,
            ProjectionMiss::MissingField {
                field: "epilogue_notes".to_string()
            }
        );
    }

    #[test]
    fn test_missing_dependency_output() {
        let table = InputProjection::new();
        let miss = table
            .project("bible", &["world".to_string()], &json!({}), &context())
            .unwrap_err();
        assert_eq!(
            miss,
            ProjectionMiss::MissingOutput {
                dependency: "world".to_string()
            }
        );
    }

    #[test]
    fn test_projection_json_shape() {
        let table: InputProjection = serde_json::from_value(json!({
            "scene": [
                {"source": {"task": "outline"}, "pointer": "/tone"},
                {"source": {"initial": "style"}, "required": false}
            ]
        }))
        .unwrap();

        let fields = table.rule("scene").unwrap();
        assert_eq!(fields[0].key(), "outline");
        assert!(fields[0].required);
        assert!(!fields[1].required);
    }
}
