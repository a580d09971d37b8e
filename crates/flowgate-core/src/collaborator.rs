//! External collaborator traits consumed by the workflow engine.
//!
//! Each trait is object-safe (boxed futures) so the orchestrator can hold
//! `Arc<dyn ...>` handles and tests can swap in fakes. The infrastructure
//! layer provides HTTP-backed implementations.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use flowgate_types::workflow::ContextMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boxed, sendable future returned by collaborator methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by an external collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator could not be reached.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered with an error.
    #[error("collaborator request failed: {0}")]
    Failed(String),

    /// The collaborator's answer could not be decoded.
    #[error("invalid collaborator response: {0}")]
    InvalidResponse(String),
}

// ---------------------------------------------------------------------------
// Task execution
// ---------------------------------------------------------------------------

/// Structured response from a task (agent) invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResponse {
    pub output: Value,
    #[serde(default)]
    pub metadata: ContextMap,
}

/// Runs AGENT steps. May fail transiently; the retry controller decides.
pub trait TaskExecutor: Send + Sync {
    fn invoke<'a>(
        &'a self,
        agent_id: &'a str,
        prompt: &'a str,
        context: &'a ContextMap,
    ) -> BoxFuture<'a, Result<TaskResponse, CollaboratorError>>;
}

// ---------------------------------------------------------------------------
// API calls
// ---------------------------------------------------------------------------

/// A fully rendered outbound request for an API_CALL step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Status and decoded body of an API_CALL response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes API_CALL requests.
pub trait ApiClient: Send + Sync {
    fn call<'a>(&'a self, request: ApiRequest) -> BoxFuture<'a, Result<ApiResponse, CollaboratorError>>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Fire-and-forget event publication. Failures are logged, never escalated.
pub trait Notifier: Send + Sync {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        event_type: &'a str,
        payload: Value,
    ) -> BoxFuture<'a, Result<(), CollaboratorError>>;
}
