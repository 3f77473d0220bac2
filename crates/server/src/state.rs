use adapter::HealthBoard;
use axum::extract::FromRef;
use domain::PipelineEvent;
use std::sync::Arc;
use storage::Db;
use tokio::sync::broadcast;

use crate::http::auth::BasicAuth;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub health: HealthBoard,
    /// Manual relabels are announced here so the dispatcher wakes up.
    pub events: broadcast::Sender<PipelineEvent>,
    pub auth: Arc<BasicAuth>,
}

impl FromRef<AppState> for Db {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
