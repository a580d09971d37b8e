//! In-process `Notifier` backed by `tokio::sync::broadcast`.
//!
//! Lagging receivers lose the oldest notifications; a bus with no live
//! receivers drops everything it is sent.

use flowgate_types::event::Notification;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::collaborator::{BoxFuture, CollaboratorError, Notifier};

/// Clones share one channel.
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
}

impl EventBus {
    /// `capacity` is the per-receiver backlog before lagging (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receives every notification sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn send(&self, notification: Notification) {
        let _ = self.sender.send(notification);
    }
}

impl Notifier for EventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        event_type: &'a str,
        payload: Value,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.send(Notification::new(topic, event_type, payload));
            Ok(())
        })
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_types::event::event_type;
    use serde_json::json;

    #[tokio::test]
    async fn publish_and_subscribe_delivers_notification() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish("workflow.abc", event_type::STEP_COMPLETED, json!({ "step_id": "fetch" }))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "workflow.abc");
        assert_eq!(received.event_type, "step_completed");
        assert_eq!(received.payload["step_id"], "fetch");
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_notification() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.send(Notification::new("t", event_type::APPROVAL_NEEDED, json!({})));

        assert_eq!(rx1.recv().await.unwrap().event_type, "approval_needed");
        assert_eq!(rx2.recv().await.unwrap().event_type, "approval_needed");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_succeeds() {
        let bus = EventBus::new(16);
        bus.publish("t", event_type::EXECUTION_STARTED, Value::Null)
            .await
            .unwrap();
    }

    #[test]
    fn lagged_receiver_handles_gracefully() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.send(Notification::new("t", event_type::STEP_COMPLETED, json!({ "i": i })));
        }

        match rx.try_recv() {
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_capacity_still_delivers() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();

        bus.send(Notification::new("t", event_type::EXECUTION_STARTED, Value::Null));

        assert_eq!(rx.try_recv().unwrap().event_type, "execution_started");
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.send(Notification::new("t", event_type::STEP_FAILED, Value::Null));

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn debug_impl() {
        let bus = EventBus::new(16);
        let _rx = bus.subscribe();
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("receiver_count"));
    }
}
