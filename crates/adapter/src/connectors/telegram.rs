use async_trait::async_trait;
use domain::{MediaType, NewComment, PipelineError, Source};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::unix_time;
use crate::http::{build_client, classify_reqwest_error, read_json, redact};
use crate::traits::{PlatformConnector, PollBatch};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Discussion groups to accept; empty accepts every group the bot is in.
    pub allowed_chat_ids: Vec<i64>,
    pub long_poll: Duration,
}

pub struct TelegramConnector {
    config: TelegramConfig,
    client: Client,
}

// --- Bot API payloads ---

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
struct Message {
    message_id: i64,
    date: i64,
    chat: Chat,
    from: Option<User>,
    sender_chat: Option<Chat>,
    text: Option<String>,
    caption: Option<String>,
    reply_to_message: Option<Box<Message>>,
    #[serde(default)]
    is_automatic_forward: bool,
    forward_origin: Option<MessageOrigin>,
    forward_from_chat: Option<Chat>,
    forward_from_message_id: Option<i64>,
    forward_date: Option<i64>,
    photo: Option<serde_json::Value>,
    video: Option<serde_json::Value>,
    video_note: Option<serde_json::Value>,
    voice: Option<serde_json::Value>,
    audio: Option<serde_json::Value>,
    sticker: Option<serde_json::Value>,
    animation: Option<serde_json::Value>,
    document: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct Chat {
    id: i64,
    title: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageOrigin {
    date: i64,
    chat: Option<Chat>,
    message_id: Option<i64>,
}

/// Where the discussed channel post came from.
struct PostRef<'a> {
    channel: Option<&'a Chat>,
    post_id: i64,
    date: Option<i64>,
}

impl Message {
    /// The channel post this message is attached to, if it is a comment.
    fn discussed_post(&self) -> Option<PostRef<'_>> {
        let parent = self.reply_to_message.as_deref()?;
        if !parent.is_automatic_forward {
            return None;
        }

        if let Some(origin) = &parent.forward_origin {
            return Some(PostRef {
                channel: origin.chat.as_ref(),
                post_id: origin.message_id.unwrap_or(parent.message_id),
                date: Some(origin.date),
            });
        }

        Some(PostRef {
            channel: parent.forward_from_chat.as_ref(),
            post_id: parent.forward_from_message_id.unwrap_or(parent.message_id),
            date: parent.forward_date.or(Some(parent.date)),
        })
    }

    fn media_type(&self) -> Option<MediaType> {
        if self.photo.is_some() {
            Some(MediaType::Photo)
        } else if self.video.is_some() || self.video_note.is_some() {
            Some(MediaType::Video)
        } else if self.voice.is_some() {
            Some(MediaType::Voice)
        } else if self.audio.is_some() {
            Some(MediaType::Audio)
        } else if self.sticker.is_some() {
            Some(MediaType::Sticker)
        } else if self.animation.is_some() {
            // animations also carry a `document` field
            Some(MediaType::Animation)
        } else if self.document.is_some() {
            Some(MediaType::Document)
        } else {
            None
        }
    }
}

impl TelegramConnector {
    pub fn new(config: TelegramConfig) -> Result<Self, PipelineError> {
        // the HTTP timeout has to outlast the long poll
        let client = build_client(config.long_poll + Duration::from_secs(15))?;
        Ok(Self { config, client })
    }

    fn accepts(&self, update: &Update) -> bool {
        let Some(message) = &update.message else {
            return false;
        };
        if !self.config.allowed_chat_ids.is_empty()
            && !self.config.allowed_chat_ids.contains(&message.chat.id)
        {
            return false;
        }
        message.discussed_post().is_some()
    }
}

#[async_trait]
impl PlatformConnector for TelegramConnector {
    type Item = Update;

    fn source(&self) -> Source {
        Source::Telegram
    }

    async fn poll(&self, cursor: Option<i64>) -> Result<PollBatch<Update>, PipelineError> {
        let mut query = vec![
            ("timeout", self.config.long_poll.as_secs().to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if let Some(position) = cursor {
            query.push(("offset", (position + 1).to_string()));
        }

        let token = &self.config.bot_token;
        let resp = self
            .client
            .get(format!("{API_BASE}/bot{token}/getUpdates"))
            .query(&query)
            .send()
            .await
            .map_err(|e| redact(classify_reqwest_error("getUpdates", &e), token))?;

        let body: ApiResponse<Vec<Update>> = read_json("getUpdates", resp)
            .await
            .map_err(|e| redact(e, token))?;
        if !body.ok {
            return Err(PipelineError::TransientNetwork(format!(
                "getUpdates failed ({}): {}",
                body.error_code.unwrap_or_default(),
                body.description.unwrap_or_default()
            )));
        }

        let updates = body.result.unwrap_or_default();
        // every update counts toward the offset, comment or not
        let next_position = updates.iter().map(|u| u.update_id).max();
        let total = updates.len();
        let mut items: Vec<Update> = updates.into_iter().filter(|u| self.accepts(u)).collect();
        items.sort_by_key(|u| u.update_id);

        if total > items.len() {
            debug!("Ignored {} non-comment Telegram update(s)", total - items.len());
        }

        Ok(PollBatch {
            items,
            next_position,
        })
    }

    fn normalize(&self, update: Update) -> Result<NewComment, PipelineError> {
        normalize_update(update)
    }
}

fn normalize_update(update: Update) -> Result<NewComment, PipelineError> {
    let message = update.message.ok_or_else(|| {
        PipelineError::PermanentValidation(format!("update {} has no message", update.update_id))
    })?;
    let post = message.discussed_post().ok_or_else(|| {
        PipelineError::PermanentValidation(format!(
            "message {} in chat {} is not a channel comment",
            message.message_id, message.chat.id
        ))
    })?;

    let created_at = unix_time(message.date)?;
    let post_published_at = post
        .date
        .and_then(|d| unix_time(d).ok())
        .unwrap_or(created_at);

    let channel_username = post.channel.and_then(|c| c.username.as_deref());
    let post_url = match channel_username {
        Some(username) => format!("https://t.me/{}/{}", username, post.post_id),
        None => post.post_id.to_string(),
    };
    let channel_name = post
        .channel
        .and_then(|c| c.title.clone())
        .or_else(|| message.chat.title.clone())
        .unwrap_or_else(|| message.chat.id.to_string());

    let (author_id, author_name, author_username) = match (&message.from, &message.sender_chat) {
        // anonymous admins and channels post as a chat
        (_, Some(chat)) => (
            chat.id.to_string(),
            chat.title.clone().unwrap_or_else(|| "Unknown".to_string()),
            chat.username.as_ref().map(|u| format!("@{u}")),
        ),
        (Some(user), None) => {
            let name = format!(
                "{} {}",
                user.first_name,
                user.last_name.as_deref().unwrap_or_default()
            );
            let name = name.trim();
            (
                user.id.to_string(),
                if name.is_empty() { "Unknown" } else { name }.to_string(),
                user.username.as_ref().map(|u| format!("@{u}")),
            )
        }
        (None, None) => ("0".to_string(), "Unknown".to_string(), None),
    };

    let media_type = message.media_type();
    let text = message
        .text
        .as_deref()
        .or(message.caption.as_deref())
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(NewComment {
        source: Source::Telegram,
        external_id: format!("{}_{}", message.chat.id, message.message_id),
        channel_name,
        post_id: post.post_id.to_string(),
        comment_url: post_url.clone(),
        post_url,
        author_id,
        author_name,
        author_username,
        text,
        created_at,
        post_published_at,
        has_media: media_type.is_some(),
        media_type,
    })
}
