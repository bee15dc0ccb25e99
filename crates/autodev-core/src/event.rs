use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known event type names published by the coordinator and workflow engine.
pub mod event_types {
    /// A task moved to Running.
    pub const TASK_STARTED: &str = "task_started";
    /// A task finished successfully.
    pub const TASK_COMPLETED: &str = "task_completed";
    /// A task failed.
    pub const TASK_FAILED: &str = "task_failed";
    /// A workflow record was created.
    pub const WORKFLOW_CREATED: &str = "workflow_created";
    /// A workflow began executing its stages.
    pub const WORKFLOW_STARTED: &str = "workflow_started";
    /// Every stage of a workflow finished.
    pub const WORKFLOW_COMPLETED: &str = "workflow_completed";
    /// A stage failed and the workflow stopped.
    pub const WORKFLOW_FAILED: &str = "workflow_failed";
    /// A workflow stage began.
    pub const STAGE_STARTED: &str = "stage_started";
    /// A workflow stage finished.
    pub const STAGE_COMPLETED: &str = "stage_completed";
}

/// Immutable notification describing a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Tag used to route the event to subscribers.
    pub event_type: String,
    /// Component or agent that produced the event.
    pub source: String,
    /// Event payload.
    pub data: serde_json::Value,
    /// UTC creation time.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Overrides the creation timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns a string field of the payload, if present.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_defaults_timestamp() {
        let before = Utc::now();
        let event = Event::new(
            event_types::TASK_STARTED,
            "coordinator",
            serde_json::json!({"task_id": "t1"}),
        );
        assert!(event.timestamp >= before);
        assert_eq!(event.data_str("task_id"), Some("t1"));
        assert_eq!(event.data_str("missing"), None);
    }

    #[test]
    fn test_event_explicit_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = Event::new("custom", "test", serde_json::Value::Null).with_timestamp(ts);
        assert_eq!(event.timestamp, ts);
    }
}
