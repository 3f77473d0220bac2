use domain::{any_rule_matches, AlertRule, BackoffPolicy, Comment, PipelineError, PipelineEvent};
use std::sync::Arc;
use std::time::Duration;
use storage::Db;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notify::format_alert;
use crate::traits::Notifier;

const PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub interval: Duration,
    /// Delivery attempts per alert, including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub utc_offset_hours: i32,
    pub rules: Vec<AlertRule>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DispatchReport {
    fn handled(&self) -> usize {
        self.sent + self.skipped + self.failed
    }
}

pub struct NotificationDispatcher {
    db: Db,
    notifier: Arc<dyn Notifier>,
    settings: DispatcherSettings,
}

impl NotificationDispatcher {
    pub fn new(db: Db, notifier: Arc<dyn Notifier>, settings: DispatcherSettings) -> Self {
        Self {
            db,
            notifier,
            settings,
        }
    }

    /// Send one alert, retrying transient failures with backoff.
    pub async fn deliver(&self, comment: &Comment) -> Result<(), PipelineError> {
        let message = format_alert(comment, self.settings.utc_offset_hours);
        let max_attempts = self.settings.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            match self.notifier.send(&message).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.settings.backoff.delay_for_attempt(attempt));
                    warn!(
                        "Alert for comment {} failed (attempt {}/{}), retrying in {:?}: {}",
                        comment.id,
                        attempt + 1,
                        max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(PipelineError::ExhaustedRetries {
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Evaluate one page of classified, not yet evaluated comments.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport, PipelineError> {
        let pending = self.db.pending_notifications(PAGE_SIZE).await?;
        let mut report = DispatchReport::default();

        for comment in pending {
            let id = comment.id;

            if !any_rule_matches(&self.settings.rules, &comment) {
                match self.db.mark_notification_skipped(id).await {
                    Ok(_) => report.skipped += 1,
                    Err(e) => error!("Failed to mark comment {} as skipped: {}", id, e),
                }
                continue;
            }

            match self.deliver(&comment).await {
                Ok(()) => match self.db.mark_notified(id).await {
                    Ok(true) => {
                        info!("Alert sent for comment {}", id);
                        report.sent += 1;
                    }
                    Ok(false) => debug!("Comment {} was already marked as notified", id),
                    // left unmarked, so it goes out again later
                    Err(e) => error!("Alert for comment {} sent but not recorded: {}", id, e),
                },
                Err(e) => {
                    error!("Giving up on alert for comment {}: {}", id, e);
                    match self.db.mark_notification_failed(id, &e.to_string()).await {
                        Ok(_) => report.failed += 1,
                        Err(store_err) => {
                            error!("Failed to mark alert {} as failed: {}", id, store_err)
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn drain(&self) {
        loop {
            match self.dispatch_pending().await {
                Ok(report) if report.handled() >= PAGE_SIZE as usize => continue,
                Ok(report) => {
                    if report.handled() > 0 {
                        info!(
                            "Dispatch: {} sent, {} skipped, {} failed",
                            report.sent, report.skipped, report.failed
                        );
                    }
                    break;
                }
                Err(e) => {
                    warn!("Dispatch cycle skipped: {}", e);
                    break;
                }
            }
        }
    }

    /// Dispatch every `interval`, and right away when a comment gets classified.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<PipelineEvent>,
        cancel_token: CancellationToken,
    ) {
        info!(
            "Notification dispatcher started with {} rule(s)",
            self.settings.rules.len()
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                event = events.recv(), if events_open => match event {
                    Ok(PipelineEvent::Classified { comment_id, .. }) => {
                        debug!("Dispatcher woken by comment {}", comment_id);
                    }
                    Err(RecvError::Lagged(n)) => debug!("Dispatcher skipped {} event(s)", n),
                    Err(RecvError::Closed) => {
                        events_open = false;
                        continue;
                    }
                },
                _ = cancel_token.cancelled() => break,
            }

            // an interrupted delivery stays unmarked and is retried next start
            tokio::select! {
                _ = self.drain() => {}
                _ = cancel_token.cancelled() => break,
            }
        }

        info!("Notification dispatcher stopped");
    }
}
