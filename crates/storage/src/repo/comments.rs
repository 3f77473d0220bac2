use chrono::{DateTime, Utc};
use domain::{Comment, InsertOutcome, NewComment, Sentiment};
use sqlx::SqliteConnection;

use crate::models::{into_comments, SqlComment, COMMENT_COLUMNS};
use crate::{Db, StoreError};

/// Insert a comment unless `(source, external_id)` already exists.
pub(crate) async fn insert_one(
    conn: &mut SqliteConnection,
    c: &NewComment,
    ingested_at: DateTime<Utc>,
) -> Result<InsertOutcome, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO comments (
            source, external_id, channel_name, post_id, post_url, comment_url,
            author_id, author_name, author_username, text,
            created_at, post_published_at, has_media, media_type,
            sentiment_source, processing_status, retry_count, notified, ingested_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'AUTO', 'PENDING', 0, FALSE, ?)
        ON CONFLICT(source, external_id) DO NOTHING
        "#,
    )
    .bind(c.source.as_str())
    .bind(&c.external_id)
    .bind(&c.channel_name)
    .bind(&c.post_id)
    .bind(&c.post_url)
    .bind(&c.comment_url)
    .bind(&c.author_id)
    .bind(&c.author_name)
    .bind(&c.author_username)
    .bind(&c.text)
    .bind(c.created_at)
    .bind(c.post_published_at)
    .bind(c.has_media)
    .bind(c.media_type.map(|m| m.as_str()))
    .bind(ingested_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        Ok(InsertOutcome::Duplicate)
    } else {
        Ok(InsertOutcome::Inserted(result.last_insert_rowid()))
    }
}

impl Db {
    pub async fn insert_or_ignore(&self, c: &NewComment) -> Result<InsertOutcome, StoreError> {
        let pool = &self.pool;
        self.with_busy_retry("insert_or_ignore", move || async move {
            let mut conn = pool.acquire().await?;
            Ok::<_, StoreError>(insert_one(&mut *conn, c, Utc::now()).await?)
        })
        .await
    }

    pub async fn get_comment(&self, id: i64) -> Result<Option<Comment>, StoreError> {
        let row = sqlx::query_as::<_, SqlComment>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Comment::try_from).transpose()
    }

    pub async fn find_by_external_id(
        &self,
        source: domain::Source,
        external_id: &str,
    ) -> Result<Option<Comment>, StoreError> {
        let row = sqlx::query_as::<_, SqlComment>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE source = ? AND external_id = ?"
        ))
        .bind(source.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Comment::try_from).transpose()
    }

    /// Comments without any sentiment yet, newest first.
    pub async fn list_unlabeled(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Comment>, StoreError> {
        let rows = sqlx::query_as::<_, SqlComment>(&format!(
            r#"
            SELECT {COMMENT_COLUMNS}
            FROM comments
            WHERE sentiment IS NULL
              AND (?1 IS NULL OR julianday(created_at) >= julianday(?1))
              AND (?2 IS NULL OR julianday(created_at) <= julianday(?2))
            ORDER BY julianday(created_at) DESC, id DESC
            LIMIT ?3
            "#
        ))
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_comments(rows)
    }

    /// Manual override: the label wins over any automatic one and the row
    /// leaves the worker's queue. An unsent alert is re-evaluated.
    pub async fn set_manual_sentiment(
        &self,
        id: i64,
        sentiment: Sentiment,
        score: f64,
    ) -> Result<Comment, StoreError> {
        let pool = &self.pool;
        let rows = self
            .with_busy_retry("set_manual_sentiment", move || async move {
                Ok::<_, StoreError>(sqlx::query_as::<_, SqlComment>(&format!(
                    r#"
                    UPDATE comments
                    SET sentiment = ?,
                        sentiment_score = ?,
                        sentiment_source = 'MANUAL',
                        processing_status = 'DONE',
                        claimed_at = NULL,
                        last_error = NULL,
                        notify_status = CASE WHEN notified THEN notify_status ELSE NULL END,
                        notify_error = CASE WHEN notified THEN notify_error ELSE NULL END
                    WHERE id = ?
                    RETURNING {COMMENT_COLUMNS}
                    "#
                ))
                .bind(sentiment.as_str())
                .bind(score)
                .bind(id)
                .fetch_all(pool)
                .await?)
            })
            .await?;

        // drained above, so the update is committed by now
        match rows.into_iter().next() {
            Some(r) => Comment::try_from(r),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Send automatically labeled comments back through the worker.
    pub async fn requeue_auto(&self, include_failed: bool) -> Result<u64, StoreError> {
        let pool = &self.pool;
        self.with_busy_retry("requeue_auto", move || async move {
            let result = sqlx::query(
                r#"
                UPDATE comments
                SET processing_status = 'PENDING',
                    retry_count = 0,
                    last_error = NULL,
                    claimed_at = NULL,
                    notify_status = CASE WHEN notified THEN notify_status ELSE NULL END
                WHERE sentiment_source = 'AUTO'
                  AND (processing_status = 'DONE' OR (? AND processing_status = 'FAILED'))
                "#,
            )
            .bind(include_failed)
            .execute(pool)
            .await?;
            Ok::<_, StoreError>(result.rows_affected())
        })
        .await
    }
}
