use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use domain::{Comment, PipelineEvent, Sentiment, SentimentSource};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{store_error, ApiError};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1_000;
const DEFAULT_MANUAL_SCORE: f64 = 0.95;

#[derive(Debug, Deserialize)]
pub struct UndefinedQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SentimentUpdate {
    pub sentiment: String,
    pub sentiment_score: Option<f64>,
}

fn parse_day(value: &str, field: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid {field} format. Use YYYY-MM-DD"),
        )
    })
}

/// Inclusive UTC bounds for an optional `[start, end]` day range.
fn day_range(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), ApiError> {
    let from = start
        .map(|s| parse_day(s, "start_date"))
        .transpose()?
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt));
    let to = end
        .map(|s| parse_day(s, "end_date"))
        .transpose()?
        .and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999))
        .map(|dt| Utc.from_utc_datetime(&dt));
    Ok((from, to))
}

fn parse_update(update: &SentimentUpdate) -> Result<(Sentiment, f64), ApiError> {
    let sentiment: Sentiment = update.sentiment.trim().to_uppercase().parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "sentiment must be positive, negative or neutral".to_string(),
        )
    })?;

    let score = update.sentiment_score.unwrap_or(DEFAULT_MANUAL_SCORE);
    if !(0.0..=1.0).contains(&score) {
        return Err((
            StatusCode::BAD_REQUEST,
            "sentiment_score must be between 0 and 1".to_string(),
        ));
    }
    Ok((sentiment, score))
}

/// Comments without a sentiment label, newest first, as a bare list.
pub async fn list_undefined(
    State(state): State<AppState>,
    Query(query): Query<UndefinedQuery>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let (from, to) = day_range(query.start_date.as_deref(), query.end_date.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let comments = state
        .db
        .list_unlabeled(from, to, limit)
        .await
        .map_err(store_error)?;

    info!("Retrieved {} undefined comments", comments.len());
    Ok(Json(comments))
}

pub async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Comment>, ApiError> {
    match state.db.get_comment(id).await.map_err(store_error)? {
        Some(comment) => Ok(Json(comment)),
        None => Err((StatusCode::NOT_FOUND, format!("Comment {} not found", id))),
    }
}

/// Manual relabel. Wins over any automatic label.
pub async fn set_sentiment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<SentimentUpdate>,
) -> Result<Json<Value>, ApiError> {
    let (sentiment, score) = parse_update(&update)?;

    state
        .db
        .set_manual_sentiment(id, sentiment, score)
        .await
        .map_err(store_error)?;

    info!("Comment {} manually labeled {} ({:.2})", id, sentiment, score);
    let _ = state.events.send(PipelineEvent::Classified {
        comment_id: id,
        sentiment,
        origin: SentimentSource::Manual,
    });

    Ok(Json(json!({
        "success": true,
        "comment_id": id,
        "sentiment": sentiment.as_str().to_lowercase(),
        "sentiment_score": score,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_range_is_inclusive() {
        let (from, to) = day_range(Some("2024-06-01"), Some("2024-06-02")).unwrap();
        assert_eq!(from, Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
        let to = to.unwrap();
        assert!(to > Utc.with_ymd_and_hms(2024, 6, 2, 23, 59, 59).unwrap());
        assert!(to < Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap());
        assert_eq!(day_range(None, None).unwrap(), (None, None));
    }

    #[test]
    fn bad_dates_are_rejected() {
        let err = day_range(Some("01.06.2024"), None).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(err.1.contains("start_date"));
    }

    #[test]
    fn updates_are_validated() {
        let ok = SentimentUpdate {
            sentiment: "negative".into(),
            sentiment_score: None,
        };
        assert_eq!(parse_update(&ok).unwrap(), (Sentiment::Negative, 0.95));

        let bad_label = SentimentUpdate {
            sentiment: "angry".into(),
            sentiment_score: None,
        };
        assert_eq!(parse_update(&bad_label).unwrap_err().0, StatusCode::BAD_REQUEST);

        let bad_score = SentimentUpdate {
            sentiment: "POSITIVE".into(),
            sentiment_score: Some(1.5),
        };
        assert_eq!(parse_update(&bad_score).unwrap_err().0, StatusCode::BAD_REQUEST);
    }
}
