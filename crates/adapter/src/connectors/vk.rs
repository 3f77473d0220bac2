use async_trait::async_trait;
use domain::{MediaType, NewComment, PipelineError, Source};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::unix_time;
use crate::http::{build_client, classify_reqwest_error, read_json};
use crate::traits::{PlatformConnector, PollBatch};

const API_BASE: &str = "https://api.vk.com/method";

/// Posts whose comments are closed, deleted or private.
const COMMENTS_UNAVAILABLE: [i64; 4] = [15, 18, 30, 212];

#[derive(Debug, Clone)]
pub struct VkConfig {
    pub access_token: String,
    /// Numeric id (negative for communities), screen name or vk.com link.
    pub owner: String,
    pub api_version: String,
    pub posts_to_check: u32,
    pub comments_per_post: u32,
    pub request_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WallOwner {
    id: i64,
    name: String,
}

pub struct VkConnector {
    config: VkConfig,
    client: Client,
    owner: OnceCell<WallOwner>,
}

/// One wall comment together with the post and author data needed to
/// normalize it.
#[derive(Debug, Clone)]
pub struct VkItem {
    owner_id: i64,
    owner_name: String,
    post_id: i64,
    post_date: Option<i64>,
    comment: VkComment,
    author: VkAuthor,
}

#[derive(Debug, Clone, PartialEq)]
struct VkAuthor {
    id: String,
    name: String,
    username: Option<String>,
}

// --- VK API payloads ---

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct WallPage {
    #[serde(default)]
    items: Vec<VkPost>,
}

#[derive(Debug, Deserialize)]
struct VkPost {
    id: i64,
    #[serde(default)]
    date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CommentsPage {
    #[serde(default)]
    items: Vec<VkComment>,
    #[serde(default)]
    profiles: Vec<VkProfile>,
    #[serde(default)]
    groups: Vec<VkGroup>,
}

#[derive(Debug, Clone, Deserialize)]
struct VkComment {
    id: i64,
    #[serde(default)]
    from_id: i64,
    date: i64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<VkAttachment>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct VkAttachment {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VkProfile {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    screen_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VkGroup {
    id: i64,
    #[serde(default)]
    name: String,
    screen_name: Option<String>,
}

/// `groups.getById` changed shape in 5.194.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GroupsById {
    Wrapped { groups: Vec<VkGroup> },
    Plain(Vec<VkGroup>),
}

enum CallError {
    Api { code: i64, message: String },
    Transport(PipelineError),
}

impl From<CallError> for PipelineError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Api { code, message } => {
                PipelineError::TransientNetwork(format!("VK API error {code}: {message}"))
            }
            CallError::Transport(e) => e,
        }
    }
}

impl CommentsPage {
    fn author_of(&self, from_id: i64) -> VkAuthor {
        if from_id >= 0 {
            let profile = self.profiles.iter().find(|p| p.id == from_id);
            let name = profile
                .map(|p| format!("{} {}", p.first_name, p.last_name).trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unknown".to_string());
            VkAuthor {
                id: from_id.to_string(),
                name,
                username: profile.and_then(|p| p.screen_name.clone()),
            }
        } else {
            let group = self.groups.iter().find(|g| g.id == -from_id);
            VkAuthor {
                id: from_id.to_string(),
                name: group
                    .map(|g| g.name.clone())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "Unknown Group".to_string()),
                username: group.and_then(|g| g.screen_name.clone()),
            }
        }
    }
}

pub(crate) fn media_from_attachment(kind: &str) -> MediaType {
    match kind {
        "photo" | "graffiti" => MediaType::Photo,
        "video" => MediaType::Video,
        "audio" => MediaType::Audio,
        "doc" => MediaType::Document,
        "sticker" => MediaType::Sticker,
        "audio_message" => MediaType::Voice,
        _ => MediaType::Other,
    }
}

/// Strip link decorations from an owner reference.
fn owner_handle(owner: &str) -> &str {
    let owner = owner.trim().trim_end_matches('/');
    let owner = owner
        .strip_prefix("https://")
        .or_else(|| owner.strip_prefix("http://"))
        .unwrap_or(owner);
    let owner = owner
        .strip_prefix("m.vk.com/")
        .or_else(|| owner.strip_prefix("vk.com/"))
        .unwrap_or(owner);
    owner.trim_start_matches('@')
}

impl VkConnector {
    pub fn new(config: VkConfig) -> Result<Self, PipelineError> {
        let client = build_client(config.timeout)?;
        Ok(Self {
            config,
            client,
            owner: OnceCell::new(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, CallError> {
        // Token goes in the form body so it never shows up in error URLs.
        let mut form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        form.push(("access_token", &self.config.access_token));
        form.push(("v", &self.config.api_version));

        let resp = self
            .client
            .post(format!("{API_BASE}/{method}"))
            .form(&form)
            .send()
            .await
            .map_err(|e| CallError::Transport(classify_reqwest_error(method, &e)))?;

        let envelope: Envelope<T> = read_json(method, resp).await.map_err(CallError::Transport)?;
        match (envelope.response, envelope.error) {
            (_, Some(err)) => Err(CallError::Api {
                code: err.error_code,
                message: err.error_msg,
            }),
            (Some(response), None) => Ok(response),
            (None, None) => Err(CallError::Transport(PipelineError::TransientNetwork(
                format!("{method}: empty response"),
            ))),
        }
    }

    async fn owner(&self) -> Result<&WallOwner, PipelineError> {
        self.owner
            .get_or_try_init(|| async {
                let owner = self.resolve_owner().await?;
                info!("VK wall resolved: {} (id {})", owner.name, owner.id);
                Ok::<_, PipelineError>(owner)
            })
            .await
    }

    async fn resolve_owner(&self) -> Result<WallOwner, PipelineError> {
        let handle = owner_handle(&self.config.owner);
        let id = match handle.parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                let resolved: serde_json::Value = self
                    .call("utils.resolveScreenName", &[("screen_name", handle.to_string())])
                    .await?;
                let object_id = resolved.get("object_id").and_then(|v| v.as_i64());
                let kind = resolved.get("type").and_then(|v| v.as_str());
                match (object_id, kind) {
                    (Some(id), Some("user")) => id,
                    (Some(id), Some(_)) => -id,
                    _ => {
                        return Err(PipelineError::FatalConfig(format!(
                            "VK owner '{}' not found",
                            self.config.owner
                        )))
                    }
                }
            }
        };

        let name = match self.owner_name(id).await {
            Ok(Some(name)) => name,
            Ok(None) => handle.to_string(),
            Err(e) => {
                warn!("Could not fetch VK owner name for {}: {}", id, e);
                handle.to_string()
            }
        };
        Ok(WallOwner { id, name })
    }

    async fn owner_name(&self, id: i64) -> Result<Option<String>, PipelineError> {
        if id < 0 {
            let groups: GroupsById = self
                .call("groups.getById", &[("group_id", (-id).to_string())])
                .await?;
            let groups = match groups {
                GroupsById::Wrapped { groups } | GroupsById::Plain(groups) => groups,
            };
            Ok(groups.into_iter().next().map(|g| g.name))
        } else {
            let users: Vec<VkProfile> = self
                .call("users.get", &[("user_ids", id.to_string())])
                .await?;
            Ok(users
                .into_iter()
                .next()
                .map(|u| format!("{} {}", u.first_name, u.last_name).trim().to_string()))
        }
    }
}

#[async_trait]
impl PlatformConnector for VkConnector {
    type Item = VkItem;

    fn source(&self) -> Source {
        Source::Vk
    }

    async fn poll(&self, cursor: Option<i64>) -> Result<PollBatch<VkItem>, PipelineError> {
        let owner = self.owner().await?;

        let posts: WallPage = self
            .call(
                "wall.get",
                &[
                    ("owner_id", owner.id.to_string()),
                    ("count", self.config.posts_to_check.to_string()),
                ],
            )
            .await?;

        let mut items = Vec::new();
        for post in posts.items {
            tokio::time::sleep(self.config.request_delay).await;

            let page: CommentsPage = match self
                .call(
                    "wall.getComments",
                    &[
                        ("owner_id", owner.id.to_string()),
                        ("post_id", post.id.to_string()),
                        ("count", self.config.comments_per_post.to_string()),
                        ("sort", "desc".to_string()),
                        ("extended", "1".to_string()),
                        ("fields", "screen_name".to_string()),
                    ],
                )
                .await
            {
                Ok(page) => page,
                Err(CallError::Api { code, message }) if COMMENTS_UNAVAILABLE.contains(&code) => {
                    debug!("Comments unavailable for post {}: {}", post.id, message);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            for comment in &page.items {
                if comment.deleted || matches!(cursor, Some(c) if comment.id <= c) {
                    continue;
                }
                items.push(VkItem {
                    owner_id: owner.id,
                    owner_name: owner.name.clone(),
                    post_id: post.id,
                    post_date: post.date,
                    comment: comment.clone(),
                    author: page.author_of(comment.from_id),
                });
            }
        }

        items.sort_by_key(|i| i.comment.id);
        let next_position = items.last().map(|i| i.comment.id);
        Ok(PollBatch {
            items,
            next_position,
        })
    }

    fn normalize(&self, item: VkItem) -> Result<NewComment, PipelineError> {
        normalize_item(item)
    }
}

fn normalize_item(item: VkItem) -> Result<NewComment, PipelineError> {
    let VkItem {
        owner_id,
        owner_name,
        post_id,
        post_date,
        comment,
        author,
    } = item;

    if comment.id <= 0 || post_id <= 0 {
        return Err(PipelineError::PermanentValidation(format!(
            "VK comment {}_{} has an invalid id",
            post_id, comment.id
        )));
    }

    let created_at = unix_time(comment.date)?;
    let post_published_at = post_date
        .and_then(|d| unix_time(d).ok())
        .unwrap_or(created_at);

    let post_url = format!("https://vk.com/wall{owner_id}_{post_id}");
    let comment_url = format!("{post_url}?reply={}", comment.id);
    let media_type = comment
        .attachments
        .first()
        .map(|a| media_from_attachment(&a.kind));

    Ok(NewComment {
        source: Source::Vk,
        external_id: format!("{post_id}_{}", comment.id),
        channel_name: owner_name,
        post_id: post_id.to_string(),
        post_url,
        comment_url,
        author_id: author.id,
        author_name: author.name,
        author_username: author.username,
        text: comment.text.trim().to_string(),
        created_at,
        post_published_at,
        has_media: media_type.is_some(),
        media_type,
    })
}
