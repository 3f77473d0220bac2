mod config;
mod http;
mod state;

use adapter::{
    run_connector, Classifier, HealthBoard, KeywordClassifier, NotificationDispatcher,
    SentimentWorker, TelegramConnector, TelegramNotifier, VkConnector, YandexClassifier,
};
use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Settings;
use http::auth::BasicAuth;
use http::router::build_router;
use state::AppState;
use storage::Db;

const PLATFORM_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let settings = Settings::load().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log.filter)),
        )
        .init();

    let db = Db::with_options(&settings.database.url, settings.database.store_options())
        .await
        .context("Failed to open comment store")?;
    log_stats(&db, "Startup").await;

    let cancel_token = CancellationToken::new();
    let health = HealthBoard::new();
    let (events, _) = broadcast::channel(256);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // 1. API listener first, so a busy port fails before anything runs
    let listener = if settings.api.enabled {
        let addr = format!("{}:{}", settings.api.host, settings.api.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to address: {}", addr))?;
        info!("API listening on {}", addr);
        Some(listener)
    } else {
        info!("HTTP API disabled");
        None
    };

    // 2. Connectors
    let ingest = settings.ingest.settings();

    match settings.vk.as_ref().filter(|v| v.enabled) {
        Some(vk) => {
            let connector = VkConnector::new(vk.connector_config(PLATFORM_TIMEOUT))?;
            tasks.push(tokio::spawn(run_connector(
                connector,
                db.clone(),
                ingest,
                health.clone(),
                cancel_token.clone(),
            )));
        }
        None => info!("VK connector not configured, skipping"),
    }

    match settings.telegram.as_ref().filter(|t| t.enabled) {
        Some(tg) => {
            let connector = TelegramConnector::new(tg.connector_config())?;
            tasks.push(tokio::spawn(run_connector(
                connector,
                db.clone(),
                ingest,
                health.clone(),
                cancel_token.clone(),
            )));
        }
        None => info!("Telegram connector not configured, skipping"),
    }

    // 3. Sentiment worker
    let classifier: Arc<dyn Classifier> = match settings.sentiment.yandex_config() {
        Some(yandex) => Arc::new(YandexClassifier::new(yandex)?),
        None => {
            warn!("No classification service configured, using keyword classifier");
            Arc::new(KeywordClassifier::new())
        }
    };
    let worker = SentimentWorker::new(
        db.clone(),
        classifier,
        settings.sentiment.worker_settings(),
        events.clone(),
    );
    tasks.push(tokio::spawn(worker.run(cancel_token.clone())));

    // 4. Notification dispatcher
    match settings.notify.notifier_config() {
        Some(notifier) => {
            let dispatcher = NotificationDispatcher::new(
                db.clone(),
                Arc::new(TelegramNotifier::new(notifier)?),
                settings.notify.dispatcher_settings(),
            );
            tasks.push(tokio::spawn(
                dispatcher.run(events.subscribe(), cancel_token.clone()),
            ));
        }
        None => info!("No notifier configured, alerts disabled"),
    }

    // 5. HTTP API
    if let Some(listener) = listener {
        let state = AppState {
            db: db.clone(),
            health: health.clone(),
            events: events.clone(),
            auth: Arc::new(BasicAuth::new(&settings.api.username, &settings.api.password)),
        };
        let app = build_router(state, &settings.api.cors_origins);
        let api_cancel = cancel_token.clone();

        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(api_cancel.cancelled_owned())
                .await
            {
                error!("API server failed: {}", e);
            }
        }));
    }

    // 6. Graceful shutdown
    shutdown_signal().await;
    cancel_token.cancel();
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!("Task ended abnormally: {}", e);
        }
    }

    log_stats(&db, "Final").await;
    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn log_stats(db: &Db, label: &str) {
    match db.stats().await {
        Ok(s) => info!(
            "{} statistics: {} comments (vk {}, telegram {}); pending {}, processing {}, done {}, failed {}; {} without sentiment, {} notified",
            label, s.total, s.vk, s.telegram, s.pending, s.processing, s.done, s.failed,
            s.undefined_sentiment, s.notified
        ),
        Err(e) => warn!("Could not read {} statistics: {}", label.to_lowercase(), e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
