//! Notification payloads published by the workflow engine.
//!
//! Every notification carries a topic (`workflow.{workflow_id}`), an event
//! type from [`event_type`], and a JSON payload. Notifications are Clone +
//! Send + Sync for use with tokio broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event type names used in notifications.
pub mod event_type {
    pub const EXECUTION_STARTED: &str = "execution_started";
    pub const EXECUTION_COMPLETED: &str = "execution_completed";
    pub const EXECUTION_FAILED: &str = "execution_failed";
    pub const EXECUTION_CANCELLED: &str = "execution_cancelled";
    pub const STEP_COMPLETED: &str = "step_completed";
    pub const STEP_FAILED: &str = "step_failed";
    pub const APPROVAL_NEEDED: &str = "approval_needed";
    pub const APPROVAL_RESOLVED: &str = "approval_resolved";
}

/// Topic for all notifications about one workflow.
pub fn workflow_topic(workflow_id: Uuid) -> String {
    format!("workflow.{workflow_id}")
}

/// A single published notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(topic: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event_type: event_type.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_topic_format() {
        let id = Uuid::nil();
        assert_eq!(
            workflow_topic(id),
            "workflow.00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_notification_serialize() {
        let n = Notification::new(
            "workflow.x",
            event_type::STEP_COMPLETED,
            json!({ "step_id": "fetch" }),
        );
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["event_type"], "step_completed");
        assert_eq!(value["payload"]["step_id"], "fetch");
        assert!(value["published_at"].is_string());
    }
}
