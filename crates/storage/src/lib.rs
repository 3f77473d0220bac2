use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use std::{fs, path::Path};
use tracing::info;

mod error;
mod models;
mod repo;
mod retry;

pub use error::StoreError;
pub use retry::BusyRetry;

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub busy_retry: BusyRetry,
    /// How long a single statement waits on a lock before SQLite reports BUSY.
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_retry: BusyRetry::default(),
            busy_timeout: Duration::from_secs(30),
            max_connections: 8,
        }
    }
}

#[derive(Clone)]
pub struct Db {
    pub(crate) pool: Pool<Sqlite>,
    pub(crate) retry: BusyRetry,
}

impl Db {
    pub async fn new(db_url: &str) -> anyhow::Result<Self> {
        Self::with_options(db_url, StoreOptions::default()).await
    }

    pub async fn with_options(db_url: &str, options: StoreOptions) -> anyhow::Result<Self> {
        if db_url.starts_with("sqlite:") && !db_url.contains(":memory:") {
            let path_str = db_url
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:");
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            let path = Path::new(path_str);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let connect = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;

        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Comment store ready at {}", db_url);

        Ok(Self {
            pool,
            retry: options.busy_retry,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
