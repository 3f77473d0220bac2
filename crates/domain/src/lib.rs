mod alerts;
mod backoff;
mod error;
mod events;
mod models;

pub use alerts::{any_rule_matches, AlertRule};
pub use backoff::{BackoffPolicy, ConnectorState};
pub use error::PipelineError;
pub use events::PipelineEvent;
pub use models::{
    BatchOutcome, Classification, Comment, InsertOutcome, Lease, MediaType, NewComment,
    NotifyStatus, ProcessingStatus, Sentiment, SentimentSource, Source, SourceCursor, StoreStats,
};
