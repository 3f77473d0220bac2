mod classifier;
mod connectors;
mod dispatcher;
mod health;
mod http;
mod ingest;
mod notify;
mod traits;
mod worker;

pub use classifier::{KeywordClassifier, YandexClassifier, YandexConfig};
pub use connectors::telegram::{TelegramConfig, TelegramConnector};
pub use connectors::vk::{VkConfig, VkConnector};
pub use dispatcher::{DispatchReport, DispatcherSettings, NotificationDispatcher};
pub use health::{ConnectorHealth, HealthBoard};
pub use ingest::{ingest_once, run_connector, IngestReport, IngestSettings};
pub use notify::telegram::{TelegramNotifier, TelegramNotifierConfig};
pub use notify::{format_alert, AlertMessage};
pub use traits::{Classifier, Notifier, PlatformConnector, PollBatch};
pub use worker::{CycleReport, SentimentWorker, WorkerSettings};
