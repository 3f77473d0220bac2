use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Unauthenticated liveness and connector health.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let connectors = state.health.snapshot().await;
    let degraded = state.health.any_degraded().await;

    match state.db.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({
                "status": if degraded { "degraded" } else { "healthy" },
                "database": "connected",
                "total_comments": stats.total,
                "pending_comments": stats.pending,
                "connectors": connectors,
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "error",
                    "error": e.to_string(),
                    "connectors": connectors,
                })),
            )
        }
    }
}
