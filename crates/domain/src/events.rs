use crate::models::{Sentiment, SentimentSource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A comment reached `DONE`, by the worker or by a manual override.
    Classified {
        comment_id: i64,
        sentiment: Sentiment,
        origin: SentimentSource,
    },
}
