use adapter::{
    ingest_once, run_connector, AlertMessage, Classifier, DispatcherSettings, HealthBoard,
    IngestSettings, KeywordClassifier, NotificationDispatcher, Notifier, PlatformConnector,
    PollBatch, SentimentWorker, WorkerSettings,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use domain::{
    AlertRule, BackoffPolicy, Classification, ConnectorState, InsertOutcome, NewComment,
    NotifyStatus, PipelineError, PipelineEvent, ProcessingStatus, Sentiment, Source,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::Db;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

async fn open() -> (TempDir, Db) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("pipeline.db").display());
    let db = Db::new(&url).await.expect("open store");
    (dir, db)
}

fn vk_comment(external_id: &str, text: &str) -> NewComment {
    let created = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    NewComment {
        source: Source::Vk,
        external_id: external_id.to_string(),
        channel_name: "Городские новости".into(),
        post_id: "123".into(),
        post_url: "https://vk.com/wall-1_123".into(),
        comment_url: "https://vk.com/wall-1_123?reply=45".into(),
        author_id: "42".into(),
        author_name: "Иван Петров".into(),
        author_username: None,
        text: text.into(),
        created_at: created,
        post_published_at: created,
        has_media: false,
        media_type: None,
    }
}

// --- fakes ---

enum FakeItem {
    Good(NewComment),
    Broken,
}

struct ScriptedConnector {
    script: Mutex<VecDeque<Result<PollBatch<FakeItem>, PipelineError>>>,
    polls: AtomicUsize,
}

impl ScriptedConnector {
    fn new(script: Vec<Result<PollBatch<FakeItem>, PipelineError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            polls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PlatformConnector for ScriptedConnector {
    type Item = FakeItem;

    fn source(&self) -> Source {
        Source::Vk
    }

    async fn poll(&self, _cursor: Option<i64>) -> Result<PollBatch<FakeItem>, PipelineError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PollBatch::empty()))
    }

    fn normalize(&self, item: FakeItem) -> Result<NewComment, PipelineError> {
        match item {
            FakeItem::Good(c) => Ok(c),
            FakeItem::Broken => Err(PipelineError::PermanentValidation("no id".into())),
        }
    }
}

struct SlowClassifier {
    calls: AtomicUsize,
}

#[async_trait]
impl Classifier for SlowClassifier {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn classify(&self, _text: &str) -> Result<Classification, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Classification {
            sentiment: Sentiment::Neutral,
            confidence: 0.5,
        })
    }
}

struct RecordingNotifier {
    sent: Mutex<Vec<AlertMessage>>,
    calls: AtomicUsize,
    failure: Option<PipelineError>,
}

impl RecordingNotifier {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            failure: None,
        })
    }

    fn failing(err: PipelineError) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            failure: Some(err),
        })
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &AlertMessage) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => {
                self.sent.lock().unwrap().push(message.clone());
                Ok(())
            }
        }
    }
}

fn worker_settings() -> WorkerSettings {
    WorkerSettings {
        interval: Duration::from_millis(20),
        batch_size: 10,
        concurrency: 4,
        max_retries: 3,
        lease_ttl: Duration::from_secs(300),
        classify_timeout: Duration::from_secs(5),
    }
}

fn dispatcher_settings() -> DispatcherSettings {
    DispatcherSettings {
        interval: Duration::from_millis(20),
        max_attempts: 3,
        backoff: BackoffPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(5)),
        utc_offset_hours: 3,
        rules: vec![AlertRule::negative()],
    }
}

// --- scenarios ---

#[tokio::test]
async fn negative_vk_comment_is_classified_and_alerted_once() {
    let (_dir, db) = open().await;
    let connector = ScriptedConnector::new(vec![Ok(PollBatch {
        items: vec![
            FakeItem::Good(vk_comment("123_45", "ужасно!")),
            FakeItem::Broken,
        ],
        next_position: Some(45),
    })]);

    let report = ingest_once(&connector, &db, None).await.unwrap();
    assert_eq!(report.outcome.inserted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.position, Some(45));
    assert_eq!(db.cursor(Source::Vk).await.unwrap().unwrap().position, 45);

    let stored = db
        .find_by_external_id(Source::Vk, "123_45")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.processing_status, ProcessingStatus::Pending);

    let (events, mut rx) = broadcast::channel(16);
    let worker = SentimentWorker::new(
        db.clone(),
        Arc::new(KeywordClassifier::new()),
        worker_settings(),
        events,
    );
    let cycle = worker.run_cycle().await.unwrap();
    assert_eq!((cycle.claimed, cycle.done), (1, 1));

    match rx.try_recv().unwrap() {
        PipelineEvent::Classified {
            comment_id,
            sentiment,
            ..
        } => {
            assert_eq!(comment_id, stored.id);
            assert_eq!(sentiment, Sentiment::Negative);
        }
    }

    let classified = db.get_comment(stored.id).await.unwrap().unwrap();
    assert_eq!(classified.processing_status, ProcessingStatus::Done);
    assert_eq!(classified.sentiment, Some(Sentiment::Negative));

    let notifier = RecordingNotifier::ok();
    let dispatcher =
        NotificationDispatcher::new(db.clone(), notifier.clone(), dispatcher_settings());
    let sent = dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(sent.sent, 1);

    let alerts = notifier.sent.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].comment_id, stored.id);
    assert!(alerts[0].html.contains("ужасно!"));

    let notified = db.get_comment(stored.id).await.unwrap().unwrap();
    assert!(notified.notified);
    assert_eq!(notified.notify_status, Some(NotifyStatus::Sent));

    assert_eq!(dispatcher.dispatch_pending().await.unwrap().sent, 0);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn replayed_batches_do_not_duplicate_rows() {
    let (_dir, db) = open().await;
    let batch = || {
        Ok(PollBatch {
            items: vec![
                FakeItem::Good(vk_comment("1_1", "a")),
                FakeItem::Good(vk_comment("1_2", "b")),
            ],
            next_position: Some(2),
        })
    };
    let connector = ScriptedConnector::new(vec![batch(), batch()]);

    let first = ingest_once(&connector, &db, None).await.unwrap();
    let second = ingest_once(&connector, &db, first.position).await.unwrap();
    assert_eq!(first.outcome.inserted, 2);
    assert_eq!((second.outcome.inserted, second.outcome.duplicates), (0, 2));
    assert_eq!(db.stats().await.unwrap().total, 2);
}

#[tokio::test]
async fn failed_poll_keeps_the_cursor() {
    let (_dir, db) = open().await;
    db.commit_batch(Source::Vk, &[], Some(10)).await.unwrap();
    let connector = ScriptedConnector::new(vec![Err(PipelineError::TransientNetwork(
        "connection reset".into(),
    ))]);

    let err = ingest_once(&connector, &db, Some(10)).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(db.cursor(Source::Vk).await.unwrap().unwrap().position, 10);
}

#[tokio::test]
async fn timed_out_classifications_end_in_failed() {
    let (_dir, db) = open().await;
    let id = match db.insert_or_ignore(&vk_comment("1_1", "текст")).await.unwrap() {
        InsertOutcome::Inserted(id) => id,
        InsertOutcome::Duplicate => unreachable!(),
    };

    let classifier = Arc::new(SlowClassifier {
        calls: AtomicUsize::new(0),
    });
    let (events, _rx) = broadcast::channel(4);
    let settings = WorkerSettings {
        classify_timeout: Duration::from_millis(30),
        ..worker_settings()
    };
    let worker = SentimentWorker::new(db.clone(), classifier.clone(), settings, events);

    let mut failed = 0;
    for _ in 0..3 {
        failed += worker.run_cycle().await.unwrap().failed;
    }
    assert_eq!(failed, 1);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);

    let row = db.get_comment(id).await.unwrap().unwrap();
    assert_eq!(row.processing_status, ProcessingStatus::Failed);
    assert_eq!(row.retry_count, 3);
    assert!(row.last_error.unwrap().contains("timed out"));

    // nothing left to claim
    assert_eq!(worker.run_cycle().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn empty_comments_fail_without_retries() {
    let (_dir, db) = open().await;
    db.insert_or_ignore(&vk_comment("1_1", "  ")).await.unwrap();

    let (events, _rx) = broadcast::channel(4);
    let worker = SentimentWorker::new(
        db.clone(),
        Arc::new(KeywordClassifier::new()),
        worker_settings(),
        events,
    );
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);

    let row = db
        .find_by_external_id(Source::Vk, "1_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.processing_status, ProcessingStatus::Failed);
    assert_eq!(row.retry_count, 3);
}

async fn classified(db: &Db, external_id: &str, text: &str) -> i64 {
    db.insert_or_ignore(&vk_comment(external_id, text))
        .await
        .unwrap();
    let (events, _rx) = broadcast::channel(4);
    SentimentWorker::new(
        db.clone(),
        Arc::new(KeywordClassifier::new()),
        worker_settings(),
        events,
    )
    .run_cycle()
    .await
    .unwrap();
    db.find_by_external_id(Source::Vk, external_id)
        .await
        .unwrap()
        .unwrap()
        .id
}

#[tokio::test]
async fn restarted_dispatcher_delivers_exactly_once() {
    let (_dir, db) = open().await;
    let id = classified(&db, "1_1", "это ужасно").await;
    let notifier = RecordingNotifier::ok();

    // an instance that never got to run
    drop(NotificationDispatcher::new(
        db.clone(),
        notifier.clone(),
        dispatcher_settings(),
    ));

    let restarted =
        NotificationDispatcher::new(db.clone(), notifier.clone(), dispatcher_settings());
    assert_eq!(restarted.dispatch_pending().await.unwrap().sent, 1);

    let again = NotificationDispatcher::new(db.clone(), notifier.clone(), dispatcher_settings());
    assert_eq!(again.dispatch_pending().await.unwrap().sent, 0);

    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert!(db.get_comment(id).await.unwrap().unwrap().notified);
}

#[tokio::test]
async fn exhausted_deliveries_are_marked_failed_and_left_alone() {
    let (_dir, db) = open().await;
    let id = classified(&db, "1_1", "кошмар").await;
    let notifier = RecordingNotifier::failing(PipelineError::TransientNetwork("502".into()));
    let dispatcher =
        NotificationDispatcher::new(db.clone(), notifier.clone(), dispatcher_settings());

    let report = dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);

    let row = db.get_comment(id).await.unwrap().unwrap();
    assert!(!row.notified);
    assert_eq!(row.notify_status, Some(NotifyStatus::Failed));

    dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_delivery_errors_stop_early() {
    let (_dir, db) = open().await;
    classified(&db, "1_1", "ужас").await;
    let notifier =
        RecordingNotifier::failing(PipelineError::PermanentValidation("chat not found".into()));
    let dispatcher =
        NotificationDispatcher::new(db.clone(), notifier.clone(), dispatcher_settings());

    assert_eq!(dispatcher.dispatch_pending().await.unwrap().failed, 1);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
}

/// Answers the first call with a flood-wait, then accepts.
struct FloodWaitNotifier {
    calls: AtomicUsize,
    retry_after: Duration,
}

#[async_trait]
impl Notifier for FloodWaitNotifier {
    async fn send(&self, _message: &AlertMessage) -> Result<(), PipelineError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(PipelineError::RateLimited {
                retry_after: self.retry_after,
                context: "HTTP 429".into(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn flood_wait_uses_the_requested_delay() {
    let (_dir, db) = open().await;
    let id = classified(&db, "1_1", "ужасно").await;
    let notifier = Arc::new(FloodWaitNotifier {
        calls: AtomicUsize::new(0),
        retry_after: Duration::from_millis(30),
    });
    let settings = DispatcherSettings {
        max_attempts: 2,
        // far longer than the test allows
        backoff: BackoffPolicy::new(Duration::from_secs(60), 2.0, Duration::from_secs(60)),
        ..dispatcher_settings()
    };
    let dispatcher = NotificationDispatcher::new(db.clone(), notifier.clone(), settings);

    let report = tokio::time::timeout(Duration::from_secs(5), dispatcher.dispatch_pending())
        .await
        .expect("waited for retry_after, not the backoff")
        .unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    assert!(db.get_comment(id).await.unwrap().unwrap().notified);
}

#[tokio::test]
async fn comments_matching_no_rule_are_skipped() {
    let (_dir, db) = open().await;
    let id = classified(&db, "1_1", "спасибо, отлично").await;
    let notifier = RecordingNotifier::ok();
    let dispatcher =
        NotificationDispatcher::new(db.clone(), notifier.clone(), dispatcher_settings());

    let report = dispatcher.dispatch_pending().await.unwrap();
    assert_eq!((report.sent, report.skipped), (0, 1));
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        db.get_comment(id).await.unwrap().unwrap().notify_status,
        Some(NotifyStatus::Skipped)
    );
}

#[tokio::test]
async fn connector_loop_recovers_and_stops_on_cancel() {
    let (_dir, db) = open().await;
    let connector = Arc::new(ScriptedConnector::new(vec![
        Err(PipelineError::TransientNetwork("timeout".into())),
        Ok(PollBatch {
            items: vec![FakeItem::Good(vk_comment("5_7", "привет"))],
            next_position: Some(7),
        }),
    ]));
    let health = HealthBoard::new();
    let cancel = CancellationToken::new();
    let settings = IngestSettings {
        poll_interval: Duration::from_millis(10),
        backoff: BackoffPolicy::new(Duration::from_millis(5), 2.0, Duration::from_millis(20)),
    };

    let handle = tokio::spawn(run_connector(
        SharedConnector(connector.clone()),
        db.clone(),
        settings,
        health.clone(),
        cancel.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop stops after cancel")
        .unwrap();

    assert!(connector.polls.load(Ordering::SeqCst) >= 2);
    assert_eq!(db.stats().await.unwrap().total, 1);
    assert_eq!(db.cursor(Source::Vk).await.unwrap().unwrap().position, 7);

    let vk = health.get(Source::Vk).await.unwrap();
    assert_eq!(vk.state, ConnectorState::Active);
    assert!(vk.last_success.is_some());
    assert_eq!(vk.last_error.as_deref(), Some("transient network error: timeout"));
}

struct SharedConnector(Arc<ScriptedConnector>);

#[async_trait]
impl PlatformConnector for SharedConnector {
    type Item = FakeItem;

    fn source(&self) -> Source {
        self.0.source()
    }

    async fn poll(&self, cursor: Option<i64>) -> Result<PollBatch<FakeItem>, PipelineError> {
        self.0.poll(cursor).await
    }

    fn normalize(&self, item: FakeItem) -> Result<NewComment, PipelineError> {
        self.0.normalize(item)
    }
}
