use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{store_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReclassifyRequest {
    #[serde(default)]
    pub include_failed: bool,
}

/// Send automatically labeled comments back to the worker. Manual labels stay.
pub async fn reclassify(
    State(state): State<AppState>,
    body: Option<Json<ReclassifyRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let requeued = state
        .db
        .requeue_auto(request.include_failed)
        .await
        .map_err(store_error)?;

    info!("Re-classification requested: {} comment(s) requeued", requeued);
    Ok(Json(json!({ "requeued": requeued })))
}
