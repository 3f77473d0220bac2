use domain::StoreStats;
use sqlx::Row;

use crate::{Db, StoreError};

impl Db {
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(source = 'vk'), 0) AS vk,
                COALESCE(SUM(source = 'telegram'), 0) AS telegram,
                COALESCE(SUM(processing_status = 'PENDING'), 0) AS pending,
                COALESCE(SUM(processing_status = 'PROCESSING'), 0) AS processing,
                COALESCE(SUM(processing_status = 'DONE'), 0) AS done,
                COALESCE(SUM(processing_status = 'FAILED'), 0) AS failed,
                COALESCE(SUM(sentiment IS NULL), 0) AS undefined_sentiment,
                COALESCE(SUM(notified), 0) AS notified
            FROM comments
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total: row.try_get("total")?,
            vk: row.try_get("vk")?,
            telegram: row.try_get("telegram")?,
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
            done: row.try_get("done")?,
            failed: row.try_get("failed")?,
            undefined_sentiment: row.try_get("undefined_sentiment")?,
            notified: row.try_get("notified")?,
        })
    }
}
