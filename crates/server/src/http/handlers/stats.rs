use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{store_error, ApiError};
use crate::state::AppState;

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let s = state.db.stats().await.map_err(store_error)?;

    Ok(Json(json!({
        "total_comments": s.total,
        "by_source": { "vk": s.vk, "telegram": s.telegram },
        "by_status": {
            "pending": s.pending,
            "processing": s.processing,
            "done": s.done,
            "failed": s.failed,
        },
        "undefined_sentiment": s.undefined_sentiment,
        "notified": s.notified,
    })))
}
