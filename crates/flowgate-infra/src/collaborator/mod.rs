//! HTTP-backed implementations of the engine's collaborator traits.

pub mod api;
pub mod task;
pub mod webhook;

pub use api::ReqwestApiClient;
pub use task::HttpTaskExecutor;
pub use webhook::WebhookNotifier;

use std::time::Duration;

use flowgate_core::collaborator::CollaboratorError;
use serde_json::Value;

fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("flowgate/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Connection-level failures are retryable unavailability; anything else
/// the transport reports is a failed request.
fn transport_error(err: reqwest::Error) -> CollaboratorError {
    if err.is_connect() || err.is_timeout() {
        CollaboratorError::Unavailable(err.to_string())
    } else {
        CollaboratorError::Failed(err.to_string())
    }
}

/// JSON when the body parses as JSON, the raw text otherwise.
fn decode_body(text: String) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
