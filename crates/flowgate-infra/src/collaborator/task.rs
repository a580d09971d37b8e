//! `TaskExecutor` that posts agent invocations to an HTTP endpoint.
//!
//! Request body: `{"agent_id", "prompt", "context"}`. The endpoint answers
//! with `{"output", "metadata"?}`.

use std::time::Duration;

use flowgate_core::collaborator::{BoxFuture, CollaboratorError, TaskExecutor, TaskResponse};
use flowgate_types::workflow::ContextMap;
use serde::Serialize;

use super::{http_client, transport_error};

#[derive(Serialize)]
struct InvokeRequest<'a> {
    agent_id: &'a str,
    prompt: &'a str,
    context: &'a ContextMap,
}

pub struct HttpTaskExecutor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTaskExecutor {
    /// Agents may run for minutes; the step timeout is the tighter bound.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(Self::REQUEST_TIMEOUT)?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl TaskExecutor for HttpTaskExecutor {
    fn invoke<'a>(
        &'a self,
        agent_id: &'a str,
        prompt: &'a str,
        context: &'a ContextMap,
    ) -> BoxFuture<'a, Result<TaskResponse, CollaboratorError>> {
        Box::pin(async move {
            tracing::debug!(agent_id, endpoint = %self.endpoint, "invoking agent");

            let response = self
                .client
                .post(&self.endpoint)
                .json(&InvokeRequest {
                    agent_id,
                    prompt,
                    context,
                })
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if status.is_server_error() {
                return Err(CollaboratorError::Unavailable(format!(
                    "agent endpoint returned {status}"
                )));
            }
            if !status.is_success() {
                return Err(CollaboratorError::Failed(format!(
                    "agent endpoint returned {status}"
                )));
            }

            response
                .json::<TaskResponse>()
                .await
                .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
        })
    }
}

/// Used when no `task_endpoint` is configured: every agent step fails.
pub struct UnconfiguredTaskExecutor;

impl TaskExecutor for UnconfiguredTaskExecutor {
    fn invoke<'a>(
        &'a self,
        agent_id: &'a str,
        _prompt: &'a str,
        _context: &'a ContextMap,
    ) -> BoxFuture<'a, Result<TaskResponse, CollaboratorError>> {
        Box::pin(async move {
            Err(CollaboratorError::Failed(format!(
                "no task endpoint configured for agent '{agent_id}'"
            )))
        })
    }
}
