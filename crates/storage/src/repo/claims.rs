use chrono::Utc;
use domain::{Classification, Comment, Lease, ProcessingStatus, SentimentSource};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

use crate::models::{into_comments, SqlComment, COMMENT_COLUMNS};
use crate::{Db, StoreError};

impl Db {
    /// Atomically move up to `limit` PENDING rows to PROCESSING, oldest first.
    ///
    /// The selection and the update are one statement, so two callers (in
    /// this process or another one sharing the file) never get the same row.
    pub async fn claim_pending(&self, limit: u32) -> Result<Vec<Comment>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let pool = &self.pool;
        let rows = self
            .with_busy_retry("claim_pending", move || async move {
                Ok::<_, StoreError>(
                    sqlx::query_as::<_, SqlComment>(&format!(
                        r#"
                        UPDATE comments
                        SET processing_status = 'PROCESSING',
                            claimed_at = ?
                        WHERE id IN (
                            SELECT id FROM comments
                            WHERE processing_status = 'PENDING'
                            ORDER BY id ASC
                            LIMIT ?
                        )
                        RETURNING {COMMENT_COLUMNS}
                        "#
                    ))
                    .bind(Utc::now())
                    .bind(i64::from(limit))
                    .fetch_all(pool)
                    .await?,
                )
            })
            .await?;

        let mut claimed = into_comments(rows)?;
        claimed.sort_by_key(|c| c.id);
        Ok(claimed)
    }

    /// Return PROCESSING rows whose lease started more than `lease_ttl` ago
    /// to PENDING.
    pub async fn reclaim_expired(&self, lease_ttl: Duration) -> Result<u64, StoreError> {
        let ttl = chrono::Duration::from_std(lease_ttl)
            .map_err(|e| StoreError::Corrupt(format!("lease ttl out of range: {e}")))?;
        let pool = &self.pool;
        let reclaimed = self
            .with_busy_retry("reclaim_expired", move || async move {
                let cutoff = Utc::now() - ttl;
                let result = sqlx::query(
                    r#"
                    UPDATE comments
                    SET processing_status = 'PENDING',
                        claimed_at = NULL
                    WHERE processing_status = 'PROCESSING'
                      AND (claimed_at IS NULL OR julianday(claimed_at) < julianday(?))
                    "#,
                )
                .bind(cutoff)
                .execute(pool)
                .await?;
                Ok::<_, StoreError>(result.rows_affected())
            })
            .await?;

        if reclaimed > 0 {
            info!("Reclaimed {} comment(s) with expired leases", reclaimed);
        }
        Ok(reclaimed)
    }

    /// PROCESSING -> DONE, only under the lease the row was claimed with.
    pub async fn complete(
        &self,
        lease: Lease,
        classification: Classification,
        source: SentimentSource,
    ) -> Result<(), StoreError> {
        let pool = &self.pool;
        let affected = self
            .with_busy_retry("complete", move || async move {
                let result = sqlx::query(
                    r#"
                    UPDATE comments
                    SET processing_status = 'DONE',
                        sentiment = ?,
                        sentiment_score = ?,
                        sentiment_source = ?,
                        claimed_at = NULL,
                        last_error = NULL
                    WHERE id = ? AND processing_status = 'PROCESSING' AND claimed_at = ?
                    "#,
                )
                .bind(classification.sentiment.as_str())
                .bind(classification.confidence)
                .bind(source.as_str())
                .bind(lease.comment_id)
                .bind(lease.claimed_at)
                .execute(pool)
                .await?;
                Ok::<_, StoreError>(result.rows_affected())
            })
            .await?;

        if affected == 0 {
            return Err(self.transition_error(lease.comment_id).await);
        }
        Ok(())
    }

    /// Record a failed attempt: back to PENDING while `retry_count <
    /// max_retries`, FAILED otherwise. Returns the new status.
    pub async fn fail(
        &self,
        lease: Lease,
        error: &str,
        max_retries: u32,
    ) -> Result<ProcessingStatus, StoreError> {
        let pool = &self.pool;
        // fetch_all steps the statement to completion, so the write is
        // committed before we return
        let rows = self
            .with_busy_retry("fail", move || async move {
                Ok::<_, StoreError>(
                    sqlx::query(
                        r#"
                        UPDATE comments
                        SET retry_count = retry_count + 1,
                            last_error = ?,
                            claimed_at = NULL,
                            processing_status = CASE
                                WHEN retry_count + 1 < ? THEN 'PENDING'
                                ELSE 'FAILED'
                            END
                        WHERE id = ? AND processing_status = 'PROCESSING' AND claimed_at = ?
                        RETURNING processing_status
                        "#,
                    )
                    .bind(error)
                    .bind(i64::from(max_retries))
                    .bind(lease.comment_id)
                    .bind(lease.claimed_at)
                    .fetch_all(pool)
                    .await?,
                )
            })
            .await?;

        match rows.into_iter().next() {
            Some(r) => r
                .try_get::<String, _>("processing_status")?
                .parse()
                .map_err(|e: domain::PipelineError| StoreError::Corrupt(e.to_string())),
            None => Err(self.transition_error(lease.comment_id).await),
        }
    }

    /// Terminal failure without retry; `retry_count` is forced to `max_retries`.
    pub async fn fail_permanently(
        &self,
        lease: Lease,
        error: &str,
        max_retries: u32,
    ) -> Result<(), StoreError> {
        let pool = &self.pool;
        let affected = self
            .with_busy_retry("fail_permanently", move || async move {
                let result = sqlx::query(
                    r#"
                    UPDATE comments
                    SET retry_count = ?,
                        last_error = ?,
                        claimed_at = NULL,
                        processing_status = 'FAILED'
                    WHERE id = ? AND processing_status = 'PROCESSING' AND claimed_at = ?
                    "#,
                )
                .bind(i64::from(max_retries))
                .bind(error)
                .bind(lease.comment_id)
                .bind(lease.claimed_at)
                .execute(pool)
                .await?;
                Ok::<_, StoreError>(result.rows_affected())
            })
            .await?;

        if affected == 0 {
            return Err(self.transition_error(lease.comment_id).await);
        }
        Ok(())
    }

    /// Why a guarded transition touched no row.
    async fn transition_error(&self, id: i64) -> StoreError {
        let status: Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT processing_status FROM comments WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;

        match status {
            Ok(None) => StoreError::NotFound(id),
            Ok(Some(actual)) => match actual.parse() {
                // still in flight, but under someone else's claim
                Ok(ProcessingStatus::Processing) => StoreError::LeaseLost(id),
                Ok(actual) => StoreError::InvalidTransition {
                    id,
                    expected: ProcessingStatus::Processing,
                    actual,
                },
                Err(e) => StoreError::Corrupt(format!("{e}")),
            },
            Err(e) => StoreError::Database(e),
        }
    }
}
