use domain::{BackoffPolicy, BatchOutcome, ConnectorState, PipelineError, Source};
use std::time::Duration;
use storage::Db;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::health::HealthBoard;
use crate::traits::{PlatformConnector, PollBatch};

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub outcome: BatchOutcome,
    /// Items dropped by `normalize`.
    pub skipped: u64,
    /// Cursor after the commit.
    pub position: Option<i64>,
}

/// One poll, normalize and commit round starting from `cursor`.
pub async fn ingest_once<C: PlatformConnector>(
    connector: &C,
    db: &Db,
    cursor: Option<i64>,
) -> Result<IngestReport, PipelineError> {
    let source = connector.source();
    let PollBatch {
        items,
        next_position,
    } = connector.poll(cursor).await?;

    let mut comments = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match connector.normalize(item) {
            Ok(comment) => comments.push(comment),
            Err(e) => {
                skipped += 1;
                warn!("Skipping malformed {} item: {}", source, e);
            }
        }
    }

    let outcome = db.commit_batch(source, &comments, next_position).await?;

    let position = match (cursor, next_position) {
        (Some(current), Some(next)) => Some(current.max(next)),
        (current, next) => next.or(current),
    };

    Ok(IngestReport {
        outcome,
        skipped,
        position,
    })
}

async fn load_cursor(db: &Db, source: Source) -> Result<Option<i64>, PipelineError> {
    let cursor = db.cursor(source).await?;
    match &cursor {
        Some(c) => info!("{} connector resuming from position {}", source, c.position),
        None => info!("{} connector starting without a cursor", source),
    }
    Ok(cursor.map(|c| c.position))
}

fn wait_after(state: ConnectorState, settings: &IngestSettings) -> Duration {
    match state {
        ConnectorState::Active => settings.poll_interval,
        ConnectorState::Backoff(n) => {
            let mut rng = rand::thread_rng();
            settings.backoff.jittered_delay(n.saturating_sub(1), &mut rng)
        }
    }
}

/// Poll until cancelled. Failures only change the connector state.
pub async fn run_connector<C>(
    connector: C,
    db: Db,
    settings: IngestSettings,
    health: HealthBoard,
    cancel_token: CancellationToken,
) where
    C: PlatformConnector + 'static,
{
    let source = connector.source();
    health.register(source).await;
    info!("{} connector started", source);

    let mut state = ConnectorState::Active;
    // read once, then tracked in memory
    let mut cursor: Option<Option<i64>> = None;

    loop {
        let round = async {
            let position = match cursor {
                Some(position) => position,
                None => {
                    let position = load_cursor(&db, source).await?;
                    cursor = Some(position);
                    position
                }
            };
            ingest_once(&connector, &db, position).await
        };

        let result = tokio::select! {
            r = round => r,
            _ = cancel_token.cancelled() => break,
        };

        match result {
            Ok(report) => {
                cursor = Some(report.position);
                if state.is_degraded() {
                    info!("{} connector recovered", source);
                }
                state = state.on_success();
                health.record_success(source).await;

                let BatchOutcome {
                    inserted,
                    duplicates,
                } = report.outcome;
                if inserted > 0 || report.skipped > 0 {
                    info!(
                        "{}: {} new, {} duplicate, {} skipped",
                        source, inserted, duplicates, report.skipped
                    );
                } else {
                    debug!("{}: nothing new ({} duplicate)", source, duplicates);
                }
            }
            Err(e) => {
                state = state.on_failure();
                if let ConnectorState::Backoff(n) = state {
                    if n == 1 {
                        warn!("{} connector degraded: {}", source, e);
                    } else {
                        warn!("{} poll failed ({} in a row): {}", source, n, e);
                    }
                }
                if matches!(e, PipelineError::TransientStorageBusy(_)) {
                    error!("{} batch was not stored, cursor unchanged", source);
                }
                health.record_failure(source, state, &e.to_string()).await;
            }
        }

        let delay = wait_after(state, &settings);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    info!("{} connector stopped", source);
}
