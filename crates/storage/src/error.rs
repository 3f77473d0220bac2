use domain::{PipelineError, ProcessingStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database still busy after {attempts} attempts: {source}")]
    Busy { attempts: u32, source: sqlx::Error },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("comment {0} not found")]
    NotFound(i64),

    #[error("comment {0} was reclaimed by another worker")]
    LeaseLost(i64),

    #[error("comment {id} is {actual}, expected {expected}")]
    InvalidTransition {
        id: i64,
        expected: ProcessingStatus,
        actual: ProcessingStatus,
    },

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy { .. })
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Busy { .. } => PipelineError::TransientStorageBusy(err.to_string()),
            StoreError::NotFound(_)
            | StoreError::LeaseLost(_)
            | StoreError::InvalidTransition { .. } => {
                PipelineError::PermanentValidation(err.to_string())
            }
            // Anything else is an I/O level problem of the store; the caller
            // re-queues and tries again on its next cycle.
            other => PipelineError::TransientStorageBusy(other.to_string()),
        }
    }
}

/// SQLITE_BUSY (5) / SQLITE_LOCKED (6), including their extended codes.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let by_code = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| matches!(c & 0xff, 5 | 6))
                .unwrap_or(false);
            by_code || db.message().contains("database is locked")
        }
        _ => false,
    }
}
