use async_trait::async_trait;
use domain::PipelineError;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::AlertMessage;
use crate::http::{build_client, classify_reqwest_error, classify_status, redact};
use crate::traits::Notifier;

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct TelegramNotifierConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub timeout: Duration,
}

/// Posts alerts to a Telegram chat through the Bot API.
pub struct TelegramNotifier {
    config: TelegramNotifierConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Map a non-2xx reply. A flood-wait 429 keeps the delay Telegram asked for.
fn rejection(status: StatusCode, body: &str) -> PipelineError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = serde_json::from_str::<SendResponse>(body)
            .ok()
            .and_then(|r| r.parameters)
            .and_then(|p| p.retry_after);
        if let Some(secs) = retry_after {
            return PipelineError::RateLimited {
                retry_after: Duration::from_secs(secs),
                context: format!("sendMessage: HTTP {status}"),
            };
        }
    }
    classify_status("sendMessage", status, body)
}

impl TelegramNotifier {
    pub fn new(config: TelegramNotifierConfig) -> Result<Self, PipelineError> {
        let client = build_client(config.timeout)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &AlertMessage) -> Result<(), PipelineError> {
        let token = &self.config.bot_token;
        let resp = self
            .client
            .post(format!("{API_BASE}/bot{token}/sendMessage"))
            .json(&json!({
                "chat_id": self.config.chat_id,
                "text": message.html,
                "parse_mode": "HTML",
                "disable_web_page_preview": false
            }))
            .send()
            .await
            .map_err(|e| redact(classify_reqwest_error("sendMessage", &e), token))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| redact(classify_reqwest_error("sendMessage", &e), token))?;
        if !status.is_success() {
            return Err(redact(rejection(status, &text), token));
        }

        let body: SendResponse = serde_json::from_str(&text).map_err(|e| {
            PipelineError::TransientNetwork(format!("sendMessage: unexpected response body: {e}"))
        })?;
        if !body.ok {
            return Err(PipelineError::PermanentValidation(format!(
                "sendMessage rejected: {}",
                body.description.unwrap_or_default()
            )));
        }

        debug!("Alert for comment {} delivered", message.comment_id);
        Ok(())
    }
}
