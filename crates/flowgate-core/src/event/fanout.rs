use std::sync::Arc;

use serde_json::Value;

use crate::collaborator::{BoxFuture, CollaboratorError, Notifier};

/// Forwards every publication to each inner notifier in order.
///
/// Inner failures are logged and skipped; the first one is returned after
/// all notifiers have been tried.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.targets.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Notifier for FanoutNotifier {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        event_type: &'a str,
        payload: Value,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            let mut first_error = None;
            for target in &self.targets {
                if let Err(e) = target.publish(topic, event_type, payload.clone()).await {
                    tracing::warn!(topic, event_type, error = %e, "notifier target failed");
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;

    struct Broken;

    impl Notifier for Broken {
        fn publish<'a>(
            &'a self,
            _topic: &'a str,
            _event_type: &'a str,
            _payload: Value,
        ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
            Box::pin(async { Err(CollaboratorError::Unavailable("offline".to_string())) })
        }
    }

    #[tokio::test]
    async fn broken_target_does_not_block_others() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let fanout = FanoutNotifier::new()
            .with(Arc::new(Broken))
            .with(Arc::new(bus.clone()));

        let result = fanout.publish("t", "step_completed", Value::Null).await;

        assert!(matches!(result, Err(CollaboratorError::Unavailable(_))));
        assert_eq!(rx.recv().await.unwrap().event_type, "step_completed");
        assert_eq!(fanout.len(), 2);
    }
}
