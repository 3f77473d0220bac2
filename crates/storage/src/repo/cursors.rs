use chrono::{DateTime, Utc};
use domain::{BatchOutcome, InsertOutcome, NewComment, Source, SourceCursor};
use sqlx::FromRow;
use tracing::debug;

use super::comments::insert_one;
use crate::{Db, StoreError};

#[derive(FromRow)]
struct SqlCursor {
    position: i64,
    updated_at: DateTime<Utc>,
}

impl Db {
    pub async fn cursor(&self, source: Source) -> Result<Option<SourceCursor>, StoreError> {
        let row = sqlx::query_as::<_, SqlCursor>(
            "SELECT position, updated_at FROM source_cursors WHERE source = ?",
        )
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SourceCursor {
            source,
            position: r.position,
            updated_at: r.updated_at,
        }))
    }

    /// Insert-or-ignore every item and advance the source cursor in one
    /// transaction. On any error nothing is written and the cursor stays put.
    ///
    /// The cursor never moves backwards.
    pub async fn commit_batch(
        &self,
        source: Source,
        items: &[NewComment],
        next_position: Option<i64>,
    ) -> Result<BatchOutcome, StoreError> {
        let pool = &self.pool;
        self.with_busy_retry("commit_batch", move || async move {
            let mut tx = pool.begin().await?;
            let now = Utc::now();
            let mut outcome = BatchOutcome::default();

            for item in items {
                match insert_one(&mut *tx, item, now).await? {
                    InsertOutcome::Inserted(_) => outcome.inserted += 1,
                    InsertOutcome::Duplicate => {
                        debug!("{} comment already stored: {}", source, item.external_id);
                        outcome.duplicates += 1;
                    }
                }
            }

            if let Some(position) = next_position {
                sqlx::query(
                    r#"
                    INSERT INTO source_cursors (source, position, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(source) DO UPDATE SET
                        position = MAX(source_cursors.position, excluded.position),
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(source.as_str())
                .bind(position)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<_, StoreError>(outcome)
        })
        .await
    }
}
