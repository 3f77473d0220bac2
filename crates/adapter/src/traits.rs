use async_trait::async_trait;
use domain::{Classification, NewComment, PipelineError, Source};

use crate::notify::AlertMessage;

/// Raw items newer than the cursor, in platform order.
#[derive(Debug, Clone)]
pub struct PollBatch<T> {
    pub items: Vec<T>,
    /// Cursor value to commit together with the items. `None` keeps the
    /// current one.
    pub next_position: Option<i64>,
}

impl<T> PollBatch<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_position: None,
        }
    }
}

#[async_trait]
pub trait PlatformConnector: Send + Sync {
    type Item: Send;

    fn source(&self) -> Source;

    /// Fetch everything after `cursor`. Failures never move the cursor.
    async fn poll(&self, cursor: Option<i64>) -> Result<PollBatch<Self::Item>, PipelineError>;

    /// A malformed item yields `PermanentValidation` and is skipped.
    fn normalize(&self, item: Self::Item) -> Result<NewComment, PipelineError>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, text: &str) -> Result<Classification, PipelineError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &AlertMessage) -> Result<(), PipelineError>;
}
