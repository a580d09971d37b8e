//! Execution status handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use uuid::Uuid;

use flowgate_types::workflow::WorkflowExecution;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/executions/{id} - Execution with its step audit trail.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state.orchestrator.get_execution(id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let workflow_link = format!("/api/v1/workflows/{}", execution.workflow_id);
    Ok(Json(
        ApiResponse::success(execution, request_id, elapsed)
            .with_link("self", format!("/api/v1/executions/{id}"))
            .with_link("workflow", workflow_link),
    ))
}
