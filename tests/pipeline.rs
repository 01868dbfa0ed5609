//! End-to-end pipeline scenarios
//!
//! Runs all four stages inside one process over the in-process broker
//! and a SQLite store, probing a local HTTP target whose status code
//! the test flips. Only the Telegram edge is faked: delivery goes
//! through a recording [`ChatPlatform`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tokio_util::sync::CancellationToken;

use sitewatch::alerter::Alerter;
use sitewatch::broker::{MemoryBroker, MessageBroker};
use sitewatch::checker::Checker;
use sitewatch::config::{
    AlerterConfig, CheckerConfig, CommonConfig, NotifierConfig, SchedulerConfig,
};
use sitewatch::model::Chat;
use sitewatch::notifier::{ChatPlatform, Notifier};
use sitewatch::repository::{Repository, SqliteRepository};
use sitewatch::scheduler::Scheduler;

const CHAT_ID: i64 = 42;
const K: usize = 3;

/// A target site whose status code the test controls.
struct Target {
    addr: SocketAddr,
    status: Arc<AtomicU16>,
}

async fn spawn_target() -> Target {
    let status = Arc::new(AtomicU16::new(200));
    let app = Router::new()
        .route(
            "/",
            get(|State(status): State<Arc<AtomicU16>>| async move {
                StatusCode::from_u16(status.load(Ordering::SeqCst))
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }),
        )
        .with_state(status.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Target { addr, status }
}

/// Records every delivered message.
struct RecordingPlatform {
    sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

struct Pipeline {
    platform: Arc<RecordingPlatform>,
    shutdown: CancellationToken,
    stages: Vec<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

impl Pipeline {
    async fn start(store: Arc<dyn Repository>, tick: Duration) -> Self {
        let broker: Arc<dyn MessageBroker> = Arc::new(MemoryBroker::new());
        let common = CommonConfig::from_env().unwrap();
        let platform = Arc::new(RecordingPlatform {
            sent: Mutex::new(Vec::new()),
        });
        let shutdown = CancellationToken::new();

        let scheduler = Scheduler::new(
            store.clone(),
            broker.clone(),
            SchedulerConfig {
                interval: tick,
                common: common.clone(),
            },
        );
        let checker = Checker::new(
            store.clone(),
            broker.clone(),
            CheckerConfig {
                workers: 4,
                common: common.clone(),
            },
        );
        let alerter = Alerter::new(
            store.clone(),
            broker.clone(),
            AlerterConfig {
                failed_checks_threshold: K,
                common: common.clone(),
            },
        )
        .unwrap();
        let notifier = Notifier::new(
            store,
            broker,
            platform.clone(),
            NotifierConfig {
                token: "test-token".to_string(),
                common,
            },
        );

        let stages = vec![
            tokio::spawn({
                let token = shutdown.clone();
                async move { scheduler.run(token).await }
            }),
            tokio::spawn({
                let token = shutdown.clone();
                async move { checker.run(token).await }
            }),
            tokio::spawn({
                let token = shutdown.clone();
                async move { alerter.run(token).await }
            }),
            tokio::spawn({
                let token = shutdown.clone();
                async move { notifier.run(token).await }
            }),
        ];

        Self {
            platform,
            shutdown,
            stages,
        }
    }

    fn deliveries(&self) -> Vec<(i64, String)> {
        self.platform.sent.lock().unwrap().clone()
    }

    /// Wait until some delivered message satisfies `predicate`.
    async fn wait_for_delivery(&self, predicate: impl Fn(&str) -> bool) -> (i64, String) {
        let deadline = Duration::from_secs(30);
        let found = tokio::time::timeout(deadline, async {
            loop {
                if let Some(hit) = self
                    .deliveries()
                    .into_iter()
                    .find(|(_, message)| predicate(message))
                {
                    return hit;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        found.expect("no matching notification was delivered in time")
    }

    async fn stop(self) {
        self.shutdown.cancel();
        for stage in self.stages {
            stage.await.unwrap().unwrap();
        }
    }
}

async fn subscribed_store(dir: &tempfile::TempDir, url: &str) -> Arc<dyn Repository> {
    let store = SqliteRepository::connect(dir.path().join("pipeline.db"))
        .await
        .unwrap();
    store
        .upsert_chat(&Chat {
            id: CHAT_ID,
            is_subscribed: true,
        })
        .await
        .unwrap();
    store.add_site_from_chat(CHAT_ID, url).await.unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn outage_and_recovery_reach_the_subscriber() {
    let target = spawn_target().await;
    let url = format!("http://{}", target.addr);
    let dir = tempfile::tempdir().unwrap();
    let store = subscribed_store(&dir, &url).await;

    let pipeline = Pipeline::start(store.clone(), Duration::from_millis(50)).await;

    // Let at least one successful probe land so recovery can measure
    // from a prior success.
    let site = store.monitored_sites().await.unwrap().remove(0);
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let tail = store.last_results_for_site(&site, 1).await.unwrap();
            if tail.first().is_some_and(|r| r.is_successful()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("no successful probe was persisted");

    // Outage: after K consecutive failures the subscriber hears bad news.
    target.status.store(500, Ordering::SeqCst);
    let (chat_id, message) = pipeline
        .wait_for_delivery(|m| m.contains("temporarily unavailable"))
        .await;
    assert_eq!(chat_id, CHAT_ID);
    assert_eq!(
        message,
        format!("Bad news. The website {url} is temporarily unavailable.")
    );

    // Recovery: the next 200 brings good news with a duration clause.
    target.status.store(200, Ordering::SeqCst);
    let (chat_id, message) = pipeline
        .wait_for_delivery(|m| m.contains("back up"))
        .await;
    assert_eq!(chat_id, CHAT_ID);
    assert!(
        message.starts_with(&format!("Good news! The website {url} is back up")),
        "unexpected message: {message}"
    );

    pipeline.stop().await;

    // Persist-before-publish held throughout: the store saw every
    // probe the pipeline acted on.
    let tail = store.last_results_for_site(&site, 100).await.unwrap();
    assert!(tail.len() >= K + 1);
}

#[tokio::test]
async fn unsubscribed_chats_hear_nothing() {
    let target = spawn_target().await;
    target.status.store(500, Ordering::SeqCst);
    let url = format!("http://{}", target.addr);
    let dir = tempfile::tempdir().unwrap();
    let store = subscribed_store(&dir, &url).await;
    store.set_chat_subscribed(CHAT_ID, false).await.unwrap();

    let pipeline = Pipeline::start(store.clone(), Duration::from_millis(50)).await;

    // Wait until the outage streak is definitely long enough to have
    // fired, then check nobody was told.
    let site = store.monitored_sites().await.unwrap().remove(0);
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let tail = store.last_results_for_site(&site, K as u32 + 1).await.unwrap();
            if tail.len() > K {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("probes never accumulated");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(pipeline.deliveries().is_empty());
    pipeline.stop().await;
}
