//! Output validation.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Accepts or rejects an agent's output.
pub trait OutputValidator: Send + Sync + Debug {
    /// Returns the list of violations on rejection.
    ///
    /// # Errors
    ///
    /// Returns every violation found, never an empty list.
    fn validate(&self, value: &serde_json::Value) -> Result<(), Vec<String>>;
}

/// A validator that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl OutputValidator for AcceptAll {
    fn validate(&self, _value: &serde_json::Value) -> Result<(), Vec<String>> {
        Ok(())
    }
}

/// JSON value categories a field may be required to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonType {
    /// Any value, including null.
    Any,
    /// A string.
    String,
    /// A number.
    Number,
    /// A boolean.
    Boolean,
    /// An array.
    Array,
    /// An object.
    Object,
}

impl JsonType {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A required top-level field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldShape {
    /// Field name.
    pub name: String,
    /// Expected type.
    pub kind: JsonType,
    /// Minimum element count when `kind` is an array.
    #[serde(default)]
    pub min_items: usize,
}

/// A declared object shape: a set of required, typed top-level fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputShape {
    /// Required fields.
    pub fields: Vec<FieldShape>,
}

impl OutputShape {
    /// Creates an empty object shape.
    #[must_use]
    pub fn object() -> Self {
        Self::default()
    }

    /// Requires a field of the given type.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, kind: JsonType) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            kind,
            min_items: 0,
        });
        self
    }

    /// Requires a non-empty array field with at least `min_items` elements.
    #[must_use]
    pub fn required_array(mut self, name: impl Into<String>, min_items: usize) -> Self {
        self.fields.push(FieldShape {
            name: name.into(),
            kind: JsonType::Array,
            min_items,
        });
        self
    }

    /// Returns the shape as JSON, for passing to the completion service.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl OutputValidator for OutputShape {
    fn validate(&self, value: &serde_json::Value) -> Result<(), Vec<String>> {
        let Some(object) = value.as_object() else {
            return Err(vec!["output is not an object".to_string()]);
        };

        let mut violations = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None => violations.push(format!("missing field '{}'", field.name)),
                Some(found) if !field.kind.matches(found) => violations.push(format!(
                    "field '{}' must be {}",
                    field.name,
                    field.kind.name()
                )),
                Some(serde_json::Value::Array(items)) if items.len() < field.min_items => {
                    violations.push(format!(
                        "field '{}' needs at least {} items, found {}",
                        field.name,
                        field.min_items,
                        items.len()
                    ));
                }
                Some(_) => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_accepts_matching_object() {
        let shape = OutputShape::object()
            .required("title", JsonType::String)
            .required_array("chapters", 1);
        assert!(shape.validate(&json!({"title": "T", "chapters": [1], "extra": null})).is_ok());
    }

    #[test]
    fn test_shape_reports_every_violation() {
        let shape = OutputShape::object()
            .required("title", JsonType::String)
            .required("score", JsonType::Number)
            .required_array("chapters", 2);

        let violations = shape
            .validate(&json!({"title": 3, "chapters": ["one"]}))
            .unwrap_err();
        assert_eq!(violations.len(), 3);
        assert!(violations[0].contains("'title' must be string"));
        assert!(violations[1].contains("missing field 'score'"));
        assert!(violations[2].contains("at least 2 items"));
    }

    #[test]
    fn test_shape_rejects_non_object() {
        assert!(OutputShape::object().validate(&json!([1, 2])).is_err());
        assert!(AcceptAll.validate(&json!([1, 2])).is_ok());
    }
}
