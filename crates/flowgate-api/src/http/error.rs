//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use flowgate_core::workflow::OrchestratorError;
use flowgate_core::workflow::context::ContextError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Engine(OrchestratorError),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Engine(e) => match e {
                OrchestratorError::DefinitionInvalid(_) => (StatusCode::BAD_REQUEST, "DEFINITION_INVALID"),
                OrchestratorError::WorkflowNotFound(_) => (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND"),
                OrchestratorError::ExecutionNotFound(_) => (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND"),
                OrchestratorError::ApprovalNotFound(_) => (StatusCode::NOT_FOUND, "APPROVAL_NOT_FOUND"),
                OrchestratorError::WorkflowInactive(_) => (StatusCode::CONFLICT, "WORKFLOW_INACTIVE"),
                OrchestratorError::DuplicateApproval(_) => (StatusCode::CONFLICT, "DUPLICATE_APPROVAL"),
                OrchestratorError::Context(ContextError::TooLarge { .. }) => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "CONTEXT_TOO_LARGE")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ApiResponse::error(code, self.to_string(), None))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::workflow::definition::DefinitionError;
    use flowgate_types::error::RepositoryError;
    use uuid::Uuid;

    fn status_of(e: OrchestratorError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        let id = Uuid::now_v7();
        assert_eq!(status_of(DefinitionError::NoSteps.into()), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(OrchestratorError::WorkflowNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(OrchestratorError::ExecutionNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(OrchestratorError::ApprovalNotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(status_of(OrchestratorError::WorkflowInactive(id)), StatusCode::CONFLICT);
        assert_eq!(
            status_of(OrchestratorError::DuplicateApproval("again".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ContextError::TooLarge { size: 11, max: 10 }.into()),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_of(RepositoryError::Query("boom".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
