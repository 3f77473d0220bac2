pub mod comments;
pub mod health;
pub mod reclassify;
pub mod stats;

use axum::http::StatusCode;
use storage::StoreError;

pub type ApiError = (StatusCode, String);

pub(crate) fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(id) => (StatusCode::NOT_FOUND, format!("Comment {} not found", id)),
        StoreError::Busy { .. } => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        other => {
            tracing::error!("Store error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}
