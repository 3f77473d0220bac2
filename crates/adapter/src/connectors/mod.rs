pub mod telegram;
pub mod vk;

use chrono::{DateTime, TimeZone, Utc};
use domain::PipelineError;

/// Unix seconds as UTC, rejecting values chrono cannot represent.
pub(crate) fn unix_time(secs: i64) -> Result<DateTime<Utc>, PipelineError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| PipelineError::PermanentValidation(format!("invalid timestamp {secs}")))
}
