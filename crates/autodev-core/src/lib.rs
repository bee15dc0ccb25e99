//! Core types and error definitions for the AutoDev orchestrator.
//!
//! This crate provides the foundational types shared across all AutoDev crates:
//! the error taxonomy, the immutable [`Event`] record, and the in-process
//! [`EventBus`] used to broadcast task and workflow lifecycle changes.
//!
//! # Main types
//!
//! - [`AutodevError`]: error type shared by every AutoDev crate.
//! - [`AutodevResult`]: `Result<T, AutodevError>`.
//! - [`Event`]: lifecycle notification carried by the bus.
//! - [`EventBus`]: publish/subscribe dispatcher keyed by event type.
//! - [`EventHandler`]: implemented by subscribers.

/// Lifecycle event records and well-known event type names.
pub mod event;
/// Publish/subscribe event bus.
pub mod event_bus;

pub use event::{event_types, Event};
pub use event_bus::{EventBus, EventHandler, SubscriptionId};

// --- Error types ---

/// Top-level error type for the AutoDev orchestrator.
///
/// Each variant corresponds to one class of failure. Task-level agent failures
/// are captured on the task record; the variants here are what callers see.
#[derive(Debug, thiserror::Error)]
pub enum AutodevError {
    /// A referenced workflow, task, or agent does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed creation parameters or an operation invalid in the current state.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An agent capability failed while executing a task.
    #[error("Agent execution error: {0}")]
    AgentExecution(String),

    /// The persistence backend could not be reached.
    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    /// A workflow stage failed; aborts the remaining stages.
    #[error("Stage error: {0}")]
    Stage(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`AutodevError`].
pub type AutodevResult<T> = Result<T, AutodevError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AutodevError::NotFound("workflow wf-1".to_string());
        assert_eq!(err.to_string(), "Not found: workflow wf-1");

        let err = AutodevError::Validation("task cannot depend on itself".to_string());
        assert!(err.to_string().starts_with("Validation error"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AutodevError = parse.unwrap_err().into();
        assert!(matches!(err, AutodevError::Json(_)));
    }
}
