//! Workflow definition and execution-start handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use flowgate_core::workflow::definition::WorkflowDraft;
use flowgate_types::workflow::{ContextMap, WorkflowDefinition, WorkflowExecution};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WorkflowListQuery {
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteWorkflowRequest {
    pub initiated_by: Uuid,
    #[serde(default)]
    pub context: Option<ContextMap>,
}

/// POST /api/v1/workflows - Validate and store a workflow definition.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<WorkflowDraft>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowDefinition>>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflow = state.orchestrator.create_workflow(body).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let self_link = format!("/api/v1/workflows/{}", workflow.id);
    let execute_link = format!("{self_link}/execute");
    let resp = ApiResponse::success(workflow, request_id, elapsed)
        .with_link("self", self_link)
        .with_link("execute", execute_link);

    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/v1/workflows - List definitions, optionally for one organization.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowListQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowDefinition>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflows = state.orchestrator.list_workflows(query.organization_id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(
        ApiResponse::success(workflows, request_id, elapsed).with_link("self", "/api/v1/workflows"),
    ))
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflow = state.orchestrator.get_workflow(id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(
        ApiResponse::success(workflow, request_id, elapsed).with_link("self", format!("/api/v1/workflows/{id}")),
    ))
}

/// POST /api/v1/workflows/{id}/deactivate - Retire a definition.
pub async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let workflow = state.orchestrator.deactivate_workflow(id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(
        ApiResponse::success(workflow, request_id, elapsed).with_link("self", format!("/api/v1/workflows/{id}")),
    ))
}

/// POST /api/v1/workflows/{id}/execute - Start an execution.
///
/// Returns 202 as soon as the execution is persisted; steps run in the
/// background.
pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ExecuteWorkflowRequest>,
) -> Result<(StatusCode, Json<ApiResponse<WorkflowExecution>>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state
        .orchestrator
        .execute_workflow(id, body.initiated_by, body.context)
        .await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let self_link = format!("/api/v1/executions/{}", execution.id);
    let resp = ApiResponse::success(execution, request_id, elapsed)
        .with_link("self", self_link)
        .with_link("workflow", format!("/api/v1/workflows/{id}"));

    Ok((StatusCode::ACCEPTED, Json(resp)))
}
