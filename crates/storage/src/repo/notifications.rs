use domain::Comment;

use crate::models::{into_comments, SqlComment, COMMENT_COLUMNS};
use crate::{Db, StoreError};

impl Db {
    /// DONE comments the dispatcher has not evaluated yet.
    pub async fn pending_notifications(&self, limit: i64) -> Result<Vec<Comment>, StoreError> {
        let rows = sqlx::query_as::<_, SqlComment>(&format!(
            r#"
            SELECT {COMMENT_COLUMNS}
            FROM comments
            WHERE processing_status = 'DONE'
              AND notified = FALSE
              AND notify_status IS NULL
            ORDER BY id ASC
            LIMIT ?
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_comments(rows)
    }

    /// Returns false when the comment was already marked.
    pub async fn mark_notified(&self, id: i64) -> Result<bool, StoreError> {
        self.set_notify_status(
            "mark_notified",
            r#"
            UPDATE comments
            SET notified = TRUE, notify_status = 'SENT', notify_error = NULL
            WHERE id = ? AND notified = FALSE
            "#,
            id,
            None,
        )
        .await
    }

    pub async fn mark_notification_skipped(&self, id: i64) -> Result<bool, StoreError> {
        self.set_notify_status(
            "mark_notification_skipped",
            r#"
            UPDATE comments
            SET notify_status = 'SKIPPED'
            WHERE id = ? AND notified = FALSE AND notify_status IS NULL
            "#,
            id,
            None,
        )
        .await
    }

    /// Delivery gave up; the row stays `notified = false` for manual follow-up.
    pub async fn mark_notification_failed(&self, id: i64, error: &str) -> Result<bool, StoreError> {
        self.set_notify_status(
            "mark_notification_failed",
            r#"
            UPDATE comments
            SET notify_status = 'FAILED', notify_error = ?2
            WHERE id = ?1 AND notified = FALSE
            "#,
            id,
            Some(error),
        )
        .await
    }

    async fn set_notify_status(
        &self,
        op: &'static str,
        sql: &'static str,
        id: i64,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let pool = &self.pool;
        let affected = self
            .with_busy_retry(op, move || async move {
                let mut query = sqlx::query(sql).bind(id);
                if let Some(e) = error {
                    query = query.bind(e);
                }
                let result = query.execute(pool).await?;
                Ok::<_, StoreError>(result.rows_affected())
            })
            .await?;

        if affected == 0 && self.get_comment(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        Ok(affected > 0)
    }
}
