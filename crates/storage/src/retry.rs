use domain::BackoffPolicy;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::{is_busy, StoreError};
use crate::Db;

/// Bounded retry of store writes on "database busy" only.
#[derive(Debug, Clone, Copy)]
pub struct BusyRetry {
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl BusyRetry {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: BackoffPolicy::new(base_delay, 2.0, base_delay * 64),
        }
    }
}

impl Default for BusyRetry {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

impl Db {
    pub(crate) async fn with_busy_retry<T, F, Fut>(
        &self,
        op: &'static str,
        mut f: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Err(StoreError::Database(e)) if is_busy(&e) => {
                    if attempt >= self.retry.attempts {
                        error!(op, attempt, "SQLite still busy, giving up: {}", e);
                        return Err(StoreError::Busy {
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = self.retry.backoff.delay_for_attempt(attempt - 1);
                    warn!(
                        op,
                        "SQLite busy (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.retry.attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
