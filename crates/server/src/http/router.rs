use super::auth::require_basic_auth;
use super::handlers::{comments, health, reclassify, stats};
use crate::state::AppState;
use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT];

    if allowed_origins == "*" {
        return CorsLayer::new()
            .allow_methods(methods)
            .allow_origin(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("CORS config is invalid or empty, falling back to allow ANY.");
        CorsLayer::new()
            .allow_methods(methods)
            .allow_origin(Any)
            .allow_headers(Any)
    } else {
        tracing::info!("CORS enabled for origins: {:?}", origins);
        CorsLayer::new()
            .allow_methods(methods)
            .allow_origin(origins)
            .allow_headers(Any)
    }
}

pub fn build_router(state: AppState, allowed_origins: &str) -> Router {
    let protected = Router::new()
        .route("/api/stats", get(stats::get_stats))
        .route("/api/comments/undefined", get(comments::list_undefined))
        .route("/api/comments/:id", get(comments::get_comment))
        .route("/api/comments/:id/sentiment", put(comments::set_sentiment))
        .route("/api/reclassify", post(reclassify::reclassify))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    Router::new()
        .route("/api/health", get(health::health))
        .merge(protected)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
