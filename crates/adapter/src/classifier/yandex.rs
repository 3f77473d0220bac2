use async_trait::async_trait;
use domain::{Classification, PipelineError, Sentiment};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::reject_empty;
use crate::http::{build_client, classify_reqwest_error, read_json};
use crate::traits::Classifier;

const COMPLETION_URL: &str = "https://llm.api.cloud.yandex.net/foundationModels/v1/completion";

const INSTRUCTIONS: &str = "Ты определяешь тональность комментариев из соцсетей. \
Ответь одной строкой: метка POSITIVE, NEUTRAL или NEGATIVE и уверенность от 0 до 1 через пробел.\n\
Комментарий: Спасибо, отличная новость!\nОтвет: POSITIVE 0.95\n\
Комментарий: Когда откроют дорогу?\nОтвет: NEUTRAL 0.8\n\
Комментарий: Опять всё сломали, ужасно.\nОтвет: NEGATIVE 0.9";

#[derive(Debug, Clone)]
pub struct YandexConfig {
    pub api_key: String,
    pub folder_id: String,
    pub model: String,
    pub timeout: Duration,
}

/// Yandex Foundation Models text completion.
pub struct YandexClassifier {
    config: YandexConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Debug, Deserialize)]
struct CompletionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Debug, Deserialize)]
struct AlternativeMessage {
    #[serde(default)]
    text: String,
}

impl YandexClassifier {
    pub fn new(config: YandexConfig) -> Result<Self, PipelineError> {
        let client = build_client(config.timeout)?;
        Ok(Self { config, client })
    }

    fn model_uri(&self) -> String {
        format!("gpt://{}/{}/latest", self.config.folder_id, self.config.model)
    }
}

/// Parse `LABEL confidence`. A missing or unreadable confidence counts as 0.5.
pub(crate) fn parse_answer(answer: &str) -> Result<Classification, PipelineError> {
    let mut parts = answer.split_whitespace();
    let sentiment = parts
        .next()
        .and_then(Sentiment::parse_loose)
        .ok_or_else(|| {
            PipelineError::TransientNetwork(format!("unrecognized classifier answer: {answer:?}"))
        })?;

    let confidence = parts
        .next()
        .and_then(|s| s.replace(',', ".").trim_end_matches('.').parse::<f64>().ok())
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.5);

    Ok(Classification {
        sentiment,
        confidence,
    })
}

#[async_trait]
impl Classifier for YandexClassifier {
    fn name(&self) -> &'static str {
        "yandexgpt"
    }

    async fn classify(&self, text: &str) -> Result<Classification, PipelineError> {
        let text = reject_empty(text)?;

        let body = json!({
            "modelUri": self.model_uri(),
            "completionOptions": {
                "stream": false,
                "temperature": 0.0,
                "maxTokens": "10"
            },
            "messages": [
                {"role": "system", "text": INSTRUCTIONS},
                {"role": "user", "text": text}
            ]
        });

        let resp = self
            .client
            .post(COMPLETION_URL)
            .header("Authorization", format!("Api-Key {}", self.config.api_key))
            .header("x-folder-id", &self.config.folder_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error("completion", &e))?;

        // a rejected key must not burn the backlog
        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(PipelineError::TransientNetwork(format!(
                "completion: HTTP {}",
                resp.status()
            )));
        }

        let completion: CompletionResponse = read_json("completion", resp).await?;
        let answer = completion
            .result
            .alternatives
            .first()
            .map(|a| a.message.text.as_str())
            .unwrap_or_default();
        parse_answer(answer)
    }
}
