use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

/// GET /health - Liveness plus a database round trip.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let database = match state.orchestrator.list_workflows(None).await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "health check database probe failed");
            "error"
        }
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
    }))
}
