use std::time::Duration;
use thiserror::Error;

/// Boundary error taxonomy. Every external call is mapped into exactly one
/// of these before it reaches a loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Transient, with the wait the remote side asked for.
    #[error("rate limited, retry after {retry_after:?}: {context}")]
    RateLimited { retry_after: Duration, context: String },

    #[error("storage temporarily unavailable: {0}")]
    TransientStorageBusy(String),

    #[error("invalid input: {0}")]
    PermanentValidation(String),

    #[error("gave up after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("configuration error: {0}")]
    FatalConfig(String),
}

impl PipelineError {
    /// Whether the same operation may succeed if attempted again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientNetwork(_)
                | PipelineError::RateLimited { .. }
                | PipelineError::TransientStorageBusy(_)
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}
