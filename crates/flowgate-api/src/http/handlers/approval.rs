//! Approval gate handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use uuid::Uuid;

use flowgate_core::workflow::ApprovalDecision;
use flowgate_types::workflow::ApprovalRequest;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApproveStepRequest {
    pub approver_id: Uuid,
    pub approved: bool,
    #[serde(default)]
    pub comments: Option<String>,
}

/// GET /api/v1/approvals/{id}
pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ApprovalRequest>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let approval = state.orchestrator.get_approval(id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let execution_link = format!("/api/v1/executions/{}", approval.workflow_execution_id);
    Ok(Json(
        ApiResponse::success(approval, request_id, elapsed)
            .with_link("self", format!("/api/v1/approvals/{id}"))
            .with_link("execution", execution_link),
    ))
}

/// POST /api/v1/approvals/{id}/approve - Approve or reject a pending gate.
pub async fn approve_step(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveStepRequest>,
) -> Result<Json<ApiResponse<ApprovalDecision>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let decision = state
        .orchestrator
        .approve_step(id, body.approver_id, body.approved, body.comments)
        .await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(
        ApiResponse::success(decision, request_id, elapsed).with_link("approval", format!("/api/v1/approvals/{id}")),
    ))
}
