//! The completion-service boundary.
//!
//! Agents talk to the external structured-generation service through
//! [`CompletionClient`]. Transport details are the host's concern; the
//! engine only cares whether a failure is transient or permanent.
//! [`GuardedCompletionClient`] wraps any client with the shared rate
//! limiter, circuit breaker and retry policy.

mod guarded;

pub use guarded::GuardedCompletionClient;

use crate::errors::{CircuitOpenError, TaskError, TaskErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// A structured-generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The task issuing the request.
    pub task: String,
    /// The rendered prompt.
    pub prompt: String,
    /// Description of the expected output shape, passed through to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_shape: Option<serde_json::Value>,
}

impl CompletionRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(task: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            prompt: prompt.into(),
            expected_shape: None,
        }
    }

    /// Sets the expected output shape.
    #[must_use]
    pub fn with_expected_shape(mut self, shape: serde_json::Value) -> Self {
        self.expected_shape = Some(shape);
        self
    }
}

/// A structured-generation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The structured payload.
    pub data: serde_json::Value,
    /// The model that produced it, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Prompt tokens, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    /// Completion tokens, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

impl CompletionResponse {
    /// Creates a response carrying only data.
    #[must_use]
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            model: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Returns total tokens.
    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }
}

/// Failure of a completion call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompletionError {
    /// A failure expected to clear on its own (timeout, 503, rate limit).
    #[error("Transient completion failure: {0}")]
    Transient(String),
    /// A failure that will recur on retry.
    #[error("Permanent completion failure: {0}")]
    Permanent(String),
    /// The circuit breaker rejected the call.
    #[error("{0}")]
    CircuitOpen(CircuitOpenError),
    /// The service answered with data that does not match the expected shape.
    #[error("Completion output invalid: {}", .0.join("; "))]
    InvalidOutput(Vec<String>),
}

impl CompletionError {
    /// Classifies a raw transport message as transient or permanent.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if crate::errors::is_retryable_message(&message) {
            Self::Transient(message)
        } else {
            Self::Permanent(message)
        }
    }

    /// Returns true if the guarded client should try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::CircuitOpen(_))
    }
}

impl From<CompletionError> for TaskError {
    fn from(err: CompletionError) -> Self {
        let retryable = err.is_retryable();
        match err {
            CompletionError::CircuitOpen(open) => {
                Self::new(TaskErrorKind::CircuitOpen, open.to_string())
            }
            CompletionError::InvalidOutput(violations) => Self::validation(&violations),
            other => Self::transport(other.to_string()).with_retryable(retryable),
        }
    }
}

/// The external structured-generation service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync + Debug {
    /// Generates structured data for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_message_classifies() {
        assert!(CompletionError::from_message("upstream timed out").is_retryable());
        assert!(CompletionError::from_message("HTTP 429 Too Many Requests").is_retryable());
        assert!(!CompletionError::from_message("invalid api key").is_retryable());
    }

    #[test]
    fn test_task_error_conversion() {
        let transient: TaskError = CompletionError::Transient("boom".to_string()).into();
        assert_eq!(transient.kind, TaskErrorKind::Transport);
        assert!(transient.retryable);

        let permanent: TaskError = CompletionError::Permanent("service unavailable".to_string()).into();
        assert!(!permanent.retryable);

        let open: TaskError = CompletionError::CircuitOpen(CircuitOpenError {
            retry_after: Duration::from_secs(3),
        })
        .into();
        assert_eq!(open.kind, TaskErrorKind::CircuitOpen);
        assert!(open.retryable);

        let invalid: TaskError = CompletionError::InvalidOutput(vec!["missing title".to_string()]).into();
        assert_eq!(invalid.kind, TaskErrorKind::Validation);
        assert!(invalid.message.contains("missing title"));
    }
}
