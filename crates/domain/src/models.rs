use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Text-backed enums stored as plain strings in the database.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PipelineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(PipelineError::PermanentValidation(format!(
                        "unknown {} value '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Vk,
    Telegram,
}

text_enum!(Source { Vk => "vk", Telegram => "telegram" });

impl Source {
    pub const ALL: [Source; 2] = [Source::Vk, Source::Telegram];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
    Voice,
    Sticker,
    Audio,
    Document,
    Animation,
    Other,
}

text_enum!(MediaType {
    Photo => "photo",
    Video => "video",
    Voice => "voice",
    Sticker => "sticker",
    Audio => "audio",
    Document => "document",
    Animation => "animation",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

text_enum!(Sentiment {
    Positive => "POSITIVE",
    Neutral => "NEUTRAL",
    Negative => "NEGATIVE",
});

impl Sentiment {
    /// Lenient parse used for external answers ("negative", " Negative.", ...).
    pub fn parse_loose(s: &str) -> Option<Self> {
        let cleaned: String = s
            .trim()
            .trim_matches(|c: char| !c.is_alphabetic())
            .to_uppercase();
        cleaned.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentimentSource {
    Auto,
    Manual,
}

text_enum!(SentimentSource { Auto => "AUTO", Manual => "MANUAL" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

text_enum!(ProcessingStatus {
    Pending => "PENDING",
    Processing => "PROCESSING",
    Done => "DONE",
    Failed => "FAILED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotifyStatus {
    Sent,
    Skipped,
    Failed,
}

text_enum!(NotifyStatus {
    Sent => "SENT",
    Skipped => "SKIPPED",
    Failed => "FAILED",
});

/// A normalized item produced by a connector, not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub source: Source,
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
    pub media_type: Option<MediaType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub source: Source,
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
    pub media_type: Option<MediaType>,
    pub sentiment: Option<Sentiment>,
    pub sentiment_score: Option<f64>,
    pub sentiment_source: SentimentSource,
    pub processing_status: ProcessingStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub notified: bool,
    pub notify_status: Option<NotifyStatus>,
    pub ingested_at: DateTime<Utc>,
}

impl Comment {
    /// The claim this copy was handed out under, if it came from `claim_pending`.
    pub fn lease(&self) -> Option<Lease> {
        self.claimed_at.map(|claimed_at| Lease {
            comment_id: self.id,
            claimed_at,
        })
    }
}

/// Proof of a claim. Outcomes are only recorded while the row still carries
/// the same `claimed_at` stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub comment_id: i64,
    pub claimed_at: DateTime<Utc>,
}

/// Last durably committed position of one source (comment id or update offset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCursor {
    pub source: Source,
    pub position: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub sentiment: Sentiment,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub inserted: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: i64,
    pub vk: i64,
    pub telegram: i64,
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
    pub undefined_sentiment: i64,
    pub notified: i64,
}
