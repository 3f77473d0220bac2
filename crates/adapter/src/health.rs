use chrono::{DateTime, Utc};
use domain::{ConnectorState, Source};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorHealth {
    pub state: ConnectorState,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Latest connector states, shared between the ingestion loops and the API.
#[derive(Clone, Default)]
pub struct HealthBoard {
    inner: Arc<RwLock<HashMap<Source, ConnectorHealth>>>,
}

impl HealthBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, source: Source) {
        self.inner
            .write()
            .await
            .entry(source)
            .or_insert_with(|| ConnectorHealth {
                state: ConnectorState::Active,
                last_success: None,
                last_error: None,
                updated_at: Utc::now(),
            });
    }

    pub async fn record_success(&self, source: Source) {
        let now = Utc::now();
        let mut map = self.inner.write().await;
        let entry = map.entry(source).or_insert_with(|| ConnectorHealth {
            state: ConnectorState::Active,
            last_success: None,
            last_error: None,
            updated_at: now,
        });
        entry.state = ConnectorState::Active;
        entry.last_success = Some(now);
        entry.updated_at = now;
    }

    pub async fn record_failure(&self, source: Source, state: ConnectorState, error: &str) {
        let now = Utc::now();
        let mut map = self.inner.write().await;
        let entry = map.entry(source).or_insert_with(|| ConnectorHealth {
            state,
            last_success: None,
            last_error: None,
            updated_at: now,
        });
        entry.state = state;
        entry.last_error = Some(error.to_string());
        entry.updated_at = now;
    }

    pub async fn get(&self, source: Source) -> Option<ConnectorHealth> {
        self.inner.read().await.get(&source).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<&'static str, ConnectorHealth> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(source, health)| (source.as_str(), health.clone()))
            .collect()
    }

    pub async fn any_degraded(&self) -> bool {
        self.inner
            .read()
            .await
            .values()
            .any(|h| h.state.is_degraded())
    }
}
