use domain::{Comment, PipelineError, PipelineEvent, ProcessingStatus, SentimentSource};
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use storage::{Db, StoreError};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::traits::Classifier;

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub interval: Duration,
    pub batch_size: u32,
    pub concurrency: usize,
    pub max_retries: u32,
    pub lease_ttl: Duration,
    /// Upper bound for one classifier call.
    pub classify_timeout: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub reclaimed: u64,
    pub claimed: usize,
    pub done: usize,
    pub retried: usize,
    pub failed: usize,
    /// Outcomes the store did not accept; the lease brings them back.
    pub unrecorded: usize,
}

enum Outcome {
    Done,
    Retried,
    Failed,
    Unrecorded,
}

fn unrecorded(id: i64, what: &str, err: StoreError) -> Outcome {
    match err {
        // the new holder records its own outcome
        StoreError::LeaseLost(_) => warn!("Comment {} lease expired, dropping its {}", id, what),
        e => error!("Failed to record {} for comment {}: {}", what, id, e),
    }
    Outcome::Unrecorded
}

/// Drains the PENDING backlog through a classifier.
pub struct SentimentWorker {
    db: Db,
    classifier: Arc<dyn Classifier>,
    settings: WorkerSettings,
    events: broadcast::Sender<PipelineEvent>,
}

impl SentimentWorker {
    pub fn new(
        db: Db,
        classifier: Arc<dyn Classifier>,
        settings: WorkerSettings,
        events: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            db,
            classifier,
            settings,
            events,
        }
    }

    /// Reclaim expired leases, claim a batch and classify it.
    pub async fn run_cycle(&self) -> Result<CycleReport, PipelineError> {
        let mut report = CycleReport {
            reclaimed: self.db.reclaim_expired(self.settings.lease_ttl).await?,
            ..CycleReport::default()
        };

        let claimed = self.db.claim_pending(self.settings.batch_size).await?;
        report.claimed = claimed.len();
        if claimed.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<Outcome> = stream::iter(claimed)
            .map(|comment| self.process(comment))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Done => report.done += 1,
                Outcome::Retried => report.retried += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Unrecorded => report.unrecorded += 1,
            }
        }
        Ok(report)
    }

    async fn process(&self, comment: Comment) -> Outcome {
        let id = comment.id;
        let Some(lease) = comment.lease() else {
            error!("Comment {} was handed out without a lease", id);
            return Outcome::Unrecorded;
        };
        let result = match tokio::time::timeout(
            self.settings.classify_timeout,
            self.classifier.classify(&comment.text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::TransientNetwork(format!(
                "classification timed out after {:?}",
                self.settings.classify_timeout
            ))),
        };

        match result {
            Ok(classification) => {
                match self
                    .db
                    .complete(lease, classification, SentimentSource::Auto)
                    .await
                {
                    Ok(()) => {
                        debug!(
                            "Comment {} classified as {} ({:.2})",
                            id, classification.sentiment, classification.confidence
                        );
                        // no subscribers is fine
                        let _ = self.events.send(PipelineEvent::Classified {
                            comment_id: id,
                            sentiment: classification.sentiment,
                            origin: SentimentSource::Auto,
                        });
                        Outcome::Done
                    }
                    Err(e) => unrecorded(id, "sentiment", e),
                }
            }
            Err(e) if e.is_transient() => {
                match self
                    .db
                    .fail(lease, &e.to_string(), self.settings.max_retries)
                    .await
                {
                    Ok(ProcessingStatus::Failed) => {
                        let exhausted = PipelineError::ExhaustedRetries {
                            attempts: self.settings.max_retries,
                            last_error: e.to_string(),
                        };
                        error!("Comment {}: {}", id, exhausted);
                        Outcome::Failed
                    }
                    Ok(_) => {
                        warn!("Comment {} will be retried: {}", id, e);
                        Outcome::Retried
                    }
                    Err(store_err) => unrecorded(id, "retry", store_err),
                }
            }
            Err(e) => {
                match self
                    .db
                    .fail_permanently(lease, &e.to_string(), self.settings.max_retries)
                    .await
                {
                    Ok(()) => {
                        warn!("Comment {} cannot be classified: {}", id, e);
                        Outcome::Failed
                    }
                    Err(store_err) => unrecorded(id, "failure", store_err),
                }
            }
        }
    }

    /// Run a cycle every `interval` until cancelled. A cycle in progress is
    /// always finished.
    pub async fn run(self, cancel_token: CancellationToken) {
        info!(
            "Sentiment worker started ({}, batch {}, concurrency {})",
            self.classifier.name(),
            self.settings.batch_size,
            self.settings.concurrency
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel_token.cancelled() => break,
            }

            match self.run_cycle().await {
                Ok(report) if report.claimed == 0 => {
                    debug!("No pending comments");
                }
                Ok(report) => info!(
                    "Sentiment cycle: {} claimed, {} done, {} retry, {} failed, {} unrecorded",
                    report.claimed, report.done, report.retried, report.failed, report.unrecorded
                ),
                Err(e) => warn!("Sentiment cycle skipped: {}", e),
            }
        }

        info!("Sentiment worker stopped");
    }
}
