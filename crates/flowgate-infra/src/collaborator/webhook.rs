//! `Notifier` that POSTs each notification as JSON to a webhook URL.

use std::time::Duration;

use flowgate_core::collaborator::{BoxFuture, CollaboratorError, Notifier};
use flowgate_types::event::Notification;
use serde_json::Value;

use super::{http_client, transport_error};

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Short, so a slow receiver cannot stall the run loop for long.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(Self::REQUEST_TIMEOUT)?,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        event_type: &'a str,
        payload: Value,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>> {
        Box::pin(async move {
            let notification = Notification::new(topic, event_type, payload);
            let response = self
                .client
                .post(&self.url)
                .json(&notification)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(CollaboratorError::Failed(format!("webhook returned {status}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unreachable_webhook_reports_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = WebhookNotifier::new(format!("http://{addr}/hook")).unwrap();
        let err = notifier
            .publish("workflow.x", "execution_started", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }
}
