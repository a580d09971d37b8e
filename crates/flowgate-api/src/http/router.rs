//! Axum router configuration with middleware.
//!
//! All engine routes are under `/api/v1/`; `/health` sits at the root.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Definitions
        .route(
            "/workflows",
            post(handlers::workflow::create_workflow).get(handlers::workflow::list_workflows),
        )
        .route("/workflows/{id}", get(handlers::workflow::get_workflow))
        .route(
            "/workflows/{id}/deactivate",
            post(handlers::workflow::deactivate_workflow),
        )
        // Executions
        .route("/workflows/{id}/execute", post(handlers::workflow::execute_workflow))
        .route("/executions/{id}", get(handlers::execution::get_execution))
        // Approvals
        .route("/approvals/{id}", get(handlers::approval::get_approval))
        .route("/approvals/{id}/approve", post(handlers::approval::approve_step));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health::health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use flowgate_types::config::EngineConfig;
    use flowgate_types::event::event_type;

    use super::*;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path(), EngineConfig::default()).await.unwrap();
        (state, dir)
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn draft(org: Uuid, steps: Value, start: &str) -> Value {
        json!({
            "name": "Pipeline",
            "organization_id": org,
            "created_by": Uuid::now_v7(),
            "steps": steps,
            "start_step_id": start,
        })
    }

    fn greeting_steps() -> Value {
        json!([{ "id": "greet", "name": "Greet", "type": "transform",
                 "config": { "transform_type": "format", "template": "hello {{ name }}" } }])
    }

    fn gated_steps() -> Value {
        json!([
            { "id": "gate", "name": "Gate", "type": "approval", "next_step_id": "greet",
              "timeout_seconds": 3600 },
            { "id": "greet", "name": "Greet", "type": "transform",
              "config": { "transform_type": "format", "template": "hello {{ name }}" } }
        ])
    }

    async fn wait_for_status(router: &Router, execution_id: &str, status: &str) -> Value {
        let uri = format!("/api/v1/executions/{execution_id}");
        for _ in 0..200 {
            let (code, body) = send(router, Method::GET, &uri, None).await;
            assert_eq!(code, StatusCode::OK);
            if body["data"]["status"] == status {
                return body["data"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {execution_id} never reached {status}");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);

        let (status, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
    }

    #[tokio::test]
    async fn invalid_definition_is_bad_request() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);

        let (status, body) = send(
            &router,
            Method::POST,
            "/api/v1/workflows",
            Some(draft(Uuid::now_v7(), greeting_steps(), "ghost")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["data"].is_null());
        assert_eq!(body["errors"][0]["code"], "DEFINITION_INVALID");
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);
        let id = Uuid::now_v7();

        for uri in [
            format!("/api/v1/workflows/{id}"),
            format!("/api/v1/executions/{id}"),
            format!("/api/v1/approvals/{id}"),
        ] {
            let (status, _) = send(&router, Method::GET, &uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/api/v1/approvals/{id}/approve"),
            Some(json!({ "approver_id": Uuid::now_v7(), "approved": true })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "APPROVAL_NOT_FOUND");
    }

    #[tokio::test]
    async fn create_execute_and_complete() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);
        let org = Uuid::now_v7();

        let (status, created) = send(
            &router,
            Method::POST,
            "/api/v1/workflows",
            Some(draft(org, greeting_steps(), "greet")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let workflow_id = created["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["_links"]["self"], format!("/api/v1/workflows/{workflow_id}"));

        let (status, listed) = send(
            &router,
            Method::GET,
            &format!("/api/v1/workflows?organization_id={org}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);

        let (status, other_org) = send(
            &router,
            Method::GET,
            &format!("/api/v1/workflows?organization_id={}", Uuid::now_v7()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(other_org["data"].as_array().unwrap().is_empty());

        let (status, started) = send(
            &router,
            Method::POST,
            &format!("/api/v1/workflows/{workflow_id}/execute"),
            Some(json!({ "initiated_by": Uuid::now_v7(), "context": { "name": "ada" } })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let execution_id = started["data"]["id"].as_str().unwrap().to_string();

        let done = wait_for_status(&router, &execution_id, "completed").await;
        assert_eq!(done["context"]["formatted_output"], "hello ada");
        assert_eq!(done["step_executions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deactivated_workflow_rejects_execution() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);

        let (_, created) = send(
            &router,
            Method::POST,
            "/api/v1/workflows",
            Some(draft(Uuid::now_v7(), greeting_steps(), "greet")),
        )
        .await;
        let workflow_id = created["data"]["id"].as_str().unwrap().to_string();

        let (status, deactivated) = send(
            &router,
            Method::POST,
            &format!("/api/v1/workflows/{workflow_id}/deactivate"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deactivated["data"]["is_active"], false);

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/api/v1/workflows/{workflow_id}/execute"),
            Some(json!({ "initiated_by": Uuid::now_v7() })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_INACTIVE");
    }

    #[tokio::test]
    async fn approval_gate_round_trip() {
        let (state, _dir) = test_state().await;
        let mut events = state.events.subscribe();
        let router = build_router(state);

        let (_, created) = send(
            &router,
            Method::POST,
            "/api/v1/workflows",
            Some(draft(Uuid::now_v7(), gated_steps(), "gate")),
        )
        .await;
        let workflow_id = created["data"]["id"].as_str().unwrap().to_string();

        let (_, started) = send(
            &router,
            Method::POST,
            &format!("/api/v1/workflows/{workflow_id}/execute"),
            Some(json!({ "initiated_by": Uuid::now_v7(), "context": { "name": "grace" } })),
        )
        .await;
        let execution_id = started["data"]["id"].as_str().unwrap().to_string();

        let approval_id = loop {
            let n = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("approval notification")
                .unwrap();
            if n.event_type == event_type::APPROVAL_NEEDED {
                break n.payload["approval_id"].as_str().unwrap().to_string();
            }
        };

        wait_for_status(&router, &execution_id, "waiting_approval").await;

        let (status, approval) = send(&router, Method::GET, &format!("/api/v1/approvals/{approval_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approval["data"]["step_id"], "gate");
        assert_eq!(approval["data"]["data_to_approve"]["name"], "grace");
        assert!(approval["data"]["approved"].is_null());

        let approve_uri = format!("/api/v1/approvals/{approval_id}/approve");
        let (status, decision) = send(
            &router,
            Method::POST,
            &approve_uri,
            Some(json!({ "approver_id": Uuid::now_v7(), "approved": true, "comments": "ship it" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decision["data"], json!({ "status": "running", "approved": true }));

        let done = wait_for_status(&router, &execution_id, "completed").await;
        assert_eq!(done["context"]["formatted_output"], "hello grace");
        assert_eq!(done["context"]["gate"]["approved"], true);

        let (status, body) = send(
            &router,
            Method::POST,
            &approve_uri,
            Some(json!({ "approver_id": Uuid::now_v7(), "approved": false })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "DUPLICATE_APPROVAL");
    }
}
