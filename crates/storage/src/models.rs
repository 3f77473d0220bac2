use chrono::{DateTime, Utc};
use domain::{Comment, PipelineError};
use sqlx::FromRow;
use std::str::FromStr;

use crate::StoreError;

pub(crate) const COMMENT_COLUMNS: &str = r#"
    id, source, external_id, channel_name, post_id, post_url, comment_url,
    author_id, author_name, author_username, text, created_at, post_published_at,
    has_media, media_type, sentiment, sentiment_score, sentiment_source,
    processing_status, retry_count, last_error, claimed_at,
    notified, notify_status, ingested_at
"#;

#[derive(FromRow)]
pub(crate) struct SqlComment {
    pub id: i64,
    pub source: String,
    pub external_id: String,
    pub channel_name: String,
    pub post_id: String,
    pub post_url: String,
    pub comment_url: String,
    pub author_id: String,
    pub author_name: String,
    pub author_username: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub post_published_at: DateTime<Utc>,
    pub has_media: bool,
    pub media_type: Option<String>,
    pub sentiment: Option<String>,
    pub sentiment_score: Option<f64>,
    pub sentiment_source: String,
    pub processing_status: String,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub notified: bool,
    pub notify_status: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

fn parse<T: FromStr<Err = PipelineError>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(|e: PipelineError| StoreError::Corrupt(e.to_string()))
}

fn parse_opt<T: FromStr<Err = PipelineError>>(value: Option<&str>) -> Result<Option<T>, StoreError> {
    value.map(parse).transpose()
}

impl TryFrom<SqlComment> for Comment {
    type Error = StoreError;

    fn try_from(sql: SqlComment) -> Result<Self, Self::Error> {
        Ok(Comment {
            id: sql.id,
            source: parse(&sql.source)?,
            external_id: sql.external_id,
            channel_name: sql.channel_name,
            post_id: sql.post_id,
            post_url: sql.post_url,
            comment_url: sql.comment_url,
            author_id: sql.author_id,
            author_name: sql.author_name,
            author_username: sql.author_username,
            text: sql.text,
            created_at: sql.created_at,
            post_published_at: sql.post_published_at,
            has_media: sql.has_media,
            media_type: parse_opt(sql.media_type.as_deref())?,
            sentiment: parse_opt(sql.sentiment.as_deref())?,
            sentiment_score: sql.sentiment_score,
            sentiment_source: parse(&sql.sentiment_source)?,
            processing_status: parse(&sql.processing_status)?,
            retry_count: u32::try_from(sql.retry_count).map_err(|_| {
                StoreError::Corrupt(format!("retry_count out of range: {}", sql.retry_count))
            })?,
            last_error: sql.last_error,
            claimed_at: sql.claimed_at,
            notified: sql.notified,
            notify_status: parse_opt(sql.notify_status.as_deref())?,
            ingested_at: sql.ingested_at,
        })
    }
}

pub(crate) fn into_comments(rows: Vec<SqlComment>) -> Result<Vec<Comment>, StoreError> {
    rows.into_iter().map(Comment::try_from).collect()
}
