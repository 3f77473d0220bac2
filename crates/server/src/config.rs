use adapter::{
    DispatcherSettings, IngestSettings, TelegramConfig, TelegramNotifierConfig, VkConfig,
    WorkerSettings, YandexConfig,
};
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use domain::{AlertRule, BackoffPolicy, PipelineError};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::time::Duration;
use storage::{BusyRetry, StoreOptions};

const ENV_PREFIX: &str = "MONITOR_";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub vk: Option<VkSettings>,
    pub telegram: Option<TelegramSettings>,
    pub ingest: IngestSection,
    pub sentiment: SentimentSettings,
    pub notify: NotifySettings,
    pub api: ApiSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub busy_retries: u32,
    pub busy_base_delay_ms: u64,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VkSettings {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default = "default_vk_api_version")]
    pub api_version: String,
    #[serde(default = "default_posts_to_check")]
    pub posts_to_check: u32,
    #[serde(default = "default_comments_per_post")]
    pub comments_per_post: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramSettings {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default, deserialize_with = "list_or_csv")]
    pub allowed_chat_ids: Vec<i64>,
    #[serde(default = "default_long_poll_secs")]
    pub long_poll_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestSection {
    pub poll_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SentimentSettings {
    pub interval_secs: u64,
    pub batch_size: u32,
    pub concurrency: usize,
    pub max_retries: u32,
    pub lease_ttl_secs: u64,
    pub timeout_secs: u64,
    pub yandex: Option<YandexSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct YandexSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default = "default_yandex_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifySettings {
    pub interval_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub utc_offset_hours: i32,
    pub telegram: Option<NotifyTelegramSettings>,
    #[serde(default = "default_rules")]
    pub rules: Vec<AlertRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyTelegramSettings {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub cors_origins: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub filter: String,
}

fn enabled() -> bool {
    true
}
fn default_vk_api_version() -> String {
    "5.199".to_string()
}
fn default_posts_to_check() -> u32 {
    10
}
fn default_comments_per_post() -> u32 {
    20
}
fn default_request_delay_ms() -> u64 {
    400
}
fn default_long_poll_secs() -> u64 {
    25
}
fn default_yandex_model() -> String {
    "yandexgpt-lite".to_string()
}
fn default_rules() -> Vec<AlertRule> {
    vec![AlertRule::negative()]
}

/// Accept `[1, 2]` from files and `"1,2"` from the environment.
fn list_or_csv<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<i64>),
        Csv(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(ids) => Ok(ids),
        Raw::Csv(s) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<i64>().map_err(serde::de::Error::custom))
            .collect(),
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("database.url", "sqlite://data/comments.db")?
        .set_default("database.busy_retries", 5)?
        .set_default("database.busy_base_delay_ms", 100)?
        .set_default("database.busy_timeout_ms", 30_000)?
        .set_default("ingest.poll_interval_secs", 60)?
        .set_default("ingest.backoff_base_ms", 1_000)?
        .set_default("ingest.backoff_multiplier", 2.0)?
        .set_default("ingest.backoff_max_ms", 300_000)?
        .set_default("ingest.backoff_jitter", 0.2)?
        .set_default("sentiment.interval_secs", 60)?
        .set_default("sentiment.batch_size", 10)?
        .set_default("sentiment.concurrency", 4)?
        .set_default("sentiment.max_retries", 3)?
        .set_default("sentiment.lease_ttl_secs", 300)?
        .set_default("sentiment.timeout_secs", 30)?
        .set_default("notify.interval_secs", 30)?
        .set_default("notify.max_attempts", 5)?
        .set_default("notify.backoff_base_ms", 1_000)?
        .set_default("notify.backoff_max_ms", 30_000)?
        .set_default("notify.utc_offset_hours", 3)?
        .set_default("api.enabled", true)?
        .set_default("api.host", "0.0.0.0")?
        .set_default("api.port", 8000)?
        .set_default("api.username", "admin")?
        .set_default("api.cors_origins", "*")?
        .set_default("log.filter", "info")
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());
        let env_json = serde_json::to_string(&collect_env_vars())
            .map_err(|e| ConfigError::Message(format!("environment: {e}")))?;

        defaults()?
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::File::with_name(&format!("config.{}", run_mode)).required(false))
            .add_source(config::File::from_str(&env_json, config::FileFormat::Json))
            .build()?
            .try_deserialize()
    }

    /// Load and validate. Every problem ends up in one `FatalConfig`.
    pub fn load() -> Result<Self, PipelineError> {
        let settings = Self::new().map_err(|e| PipelineError::FatalConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut problems = Vec::new();
        let mut require = |ok: bool, problem: &str| {
            if !ok {
                problems.push(problem.to_string());
            }
        };

        require(!self.database.url.trim().is_empty(), "database.url is empty");
        require(self.database.busy_retries >= 1, "database.busy_retries must be at least 1");

        if let Some(vk) = self.vk.as_ref().filter(|v| v.enabled) {
            require(!vk.access_token.trim().is_empty(), "vk.access_token is required");
            require(!vk.owner.trim().is_empty(), "vk.owner is required");
            require(vk.posts_to_check >= 1, "vk.posts_to_check must be at least 1");
            require(vk.comments_per_post >= 1, "vk.comments_per_post must be at least 1");
        }
        if let Some(tg) = self.telegram.as_ref().filter(|t| t.enabled) {
            require(!tg.bot_token.trim().is_empty(), "telegram.bot_token is required");
        }

        let ingest = &self.ingest;
        require(ingest.poll_interval_secs >= 1, "ingest.poll_interval_secs must be at least 1");
        require(ingest.backoff_base_ms >= 1, "ingest.backoff_base_ms must be at least 1");
        require(
            ingest.backoff_multiplier >= 1.0,
            "ingest.backoff_multiplier must be at least 1",
        );
        require(
            ingest.backoff_max_ms >= ingest.backoff_base_ms,
            "ingest.backoff_max_ms must not be below backoff_base_ms",
        );
        require(
            (0.0..=1.0).contains(&ingest.backoff_jitter),
            "ingest.backoff_jitter must be within 0..1",
        );

        let sentiment = &self.sentiment;
        require(sentiment.interval_secs >= 1, "sentiment.interval_secs must be at least 1");
        require(sentiment.batch_size >= 1, "sentiment.batch_size must be at least 1");
        require(sentiment.concurrency >= 1, "sentiment.concurrency must be at least 1");
        require(sentiment.max_retries >= 1, "sentiment.max_retries must be at least 1");
        // a claimed item may queue behind the rest of its batch
        require(
            sentiment.lease_ttl_secs > sentiment.worst_case_batch_secs(),
            "sentiment.lease_ttl_secs must exceed ceil(batch_size / concurrency) * timeout_secs",
        );
        if let Some(yandex) = &sentiment.yandex {
            require(!yandex.api_key.trim().is_empty(), "sentiment.yandex.api_key is required");
            require(
                !yandex.folder_id.trim().is_empty(),
                "sentiment.yandex.folder_id is required",
            );
        }

        let notify = &self.notify;
        require(notify.interval_secs >= 1, "notify.interval_secs must be at least 1");
        require(notify.max_attempts >= 1, "notify.max_attempts must be at least 1");
        require(
            (-12..=14).contains(&notify.utc_offset_hours),
            "notify.utc_offset_hours must be within -12..14",
        );
        if let Some(tg) = &notify.telegram {
            require(!tg.bot_token.trim().is_empty(), "notify.telegram.bot_token is required");
            require(!tg.chat_id.trim().is_empty(), "notify.telegram.chat_id is required");
        }

        if self.api.enabled {
            require(!self.api.username.is_empty(), "api.username is required");
            require(!self.api.password.is_empty(), "api.password is required");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::FatalConfig(problems.join("; ")))
        }
    }
}

impl DatabaseSettings {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_retry: BusyRetry::new(
                self.busy_retries,
                Duration::from_millis(self.busy_base_delay_ms),
            ),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            ..StoreOptions::default()
        }
    }
}

impl VkSettings {
    pub fn connector_config(&self, timeout: Duration) -> VkConfig {
        VkConfig {
            access_token: self.access_token.clone(),
            owner: self.owner.clone(),
            api_version: self.api_version.clone(),
            posts_to_check: self.posts_to_check,
            comments_per_post: self.comments_per_post,
            request_delay: Duration::from_millis(self.request_delay_ms),
            timeout,
        }
    }
}

impl TelegramSettings {
    pub fn connector_config(&self) -> TelegramConfig {
        TelegramConfig {
            bot_token: self.bot_token.clone(),
            allowed_chat_ids: self.allowed_chat_ids.clone(),
            long_poll: Duration::from_secs(self.long_poll_secs),
        }
    }
}

impl IngestSection {
    pub fn settings(&self) -> IngestSettings {
        IngestSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.backoff_base_ms),
                self.backoff_multiplier,
                Duration::from_millis(self.backoff_max_ms),
            )
            .with_jitter(self.backoff_jitter),
        }
    }
}

impl SentimentSettings {
    /// Longest a claimed item can wait before its outcome is recorded.
    pub fn worst_case_batch_secs(&self) -> u64 {
        let concurrency = self.concurrency.max(1) as u64;
        let waves = (u64::from(self.batch_size) + concurrency - 1) / concurrency;
        waves.max(1).saturating_mul(self.timeout_secs)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            interval: Duration::from_secs(self.interval_secs),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
            classify_timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn yandex_config(&self) -> Option<YandexConfig> {
        self.yandex.as_ref().map(|y| YandexConfig {
            api_key: y.api_key.clone(),
            folder_id: y.folder_id.clone(),
            model: y.model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

impl NotifySettings {
    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            interval: Duration::from_secs(self.interval_secs),
            max_attempts: self.max_attempts,
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.backoff_base_ms),
                2.0,
                Duration::from_millis(self.backoff_max_ms),
            ),
            utc_offset_hours: self.utc_offset_hours,
            rules: self.rules.clone(),
        }
    }

    pub fn notifier_config(&self) -> Option<TelegramNotifierConfig> {
        self.telegram.as_ref().map(|t| TelegramNotifierConfig {
            bot_token: t.bot_token.clone(),
            chat_id: t.chat_id.clone(),
            timeout: Duration::from_secs(10),
        })
    }
}

fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with(ENV_PREFIX))
        .map(|(k, v)| {
            let key = k
                .trim_start_matches(ENV_PREFIX)
                .replace("__", ".")
                .to_lowercase();
            (key, v)
        })
        .collect()
}
