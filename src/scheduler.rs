//! Scheduler: time-driven fan-out of the monitored set
//!
//! On every tick the scheduler reads the monitored sites and publishes
//! one message per site to the `sites` queue. No coalescing and no
//! deduplication: one site, one message, every tick.
//!
//! Ticks never overlap. If a fetch-plus-publish run outlives the
//! interval the next tick is dropped, not queued. A failed fetch ends
//! only the current tick; a failed publish for one site still leaves
//! the remaining sites attempted.

use std::sync::Arc;

use anyhow::Context;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::broker::MessageBroker;
use crate::config::SchedulerConfig;
use crate::model::Site;
use crate::repository::Repository;

pub struct Scheduler {
    store: Arc<dyn Repository>,
    broker: Arc<dyn MessageBroker>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Repository>,
        broker: Arc<dyn MessageBroker>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Run until `shutdown` is cancelled.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(
            "scheduler started, interval {:?}",
            self.config.interval
        );

        let start = time::Instant::now() + self.config.interval;
        let mut ticker = time::interval_at(start, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let sites = match self.fetch_monitored_sites().await {
                Ok(sites) => sites,
                Err(e) => {
                    error!("failed to get sites from the store: {e:#}");
                    continue;
                }
            };

            debug!("tick: fanning out {} sites", sites.len());
            for site in sites {
                if shutdown.is_cancelled() {
                    info!("scheduler stopping mid-tick");
                    return Ok(());
                }

                if let Err(e) = self.publish_site(&site).await {
                    error!(url = %site.url, "failed to send site to the broker: {e:#}");
                    continue;
                }
                debug!(url = %site.url, "site sent to the broker");
            }
        }
    }

    async fn fetch_monitored_sites(&self) -> anyhow::Result<Vec<Site>> {
        let sites = time::timeout(
            self.config.common.db_query_timeout,
            self.store.monitored_sites(),
        )
        .await
        .context("monitored sites query timed out")??;
        Ok(sites)
    }

    async fn publish_site(&self, site: &Site) -> anyhow::Result<()> {
        time::timeout(
            self.config.common.broker_timeout,
            self.broker.publish_site(site),
        )
        .await
        .context("site publish timed out")??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerResult, MemoryBroker, MessageStream};
    use crate::config::CommonConfig;
    use crate::model::{CheckResult, Notification};
    use crate::repository::{MemoryRepository, RepoError, RepoResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config(interval: Duration) -> SchedulerConfig {
        SchedulerConfig {
            interval,
            common: CommonConfig::from_env().unwrap(),
        }
    }

    async fn seeded_store(urls: &[&str]) -> Arc<MemoryRepository> {
        let store = Arc::new(MemoryRepository::new());
        for url in urls {
            store.add_site_from_chat(1, url).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn every_monitored_site_is_published_each_tick() {
        let store = seeded_store(&["http://a.com", "http://b.com"]).await;
        let broker = Arc::new(MemoryBroker::new());
        let stream = broker.consume_sites().await.unwrap();

        let scheduler = Scheduler::new(
            store,
            broker,
            test_config(Duration::from_millis(20)),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });

        let mut urls = Vec::new();
        for _ in 0..4 {
            let payload = tokio::time::timeout(Duration::from_secs(1), stream.recv())
                .await
                .unwrap()
                .unwrap();
            let site: Site = serde_json::from_slice(&payload).unwrap();
            urls.push(site.url);
        }

        shutdown.cancel();
        task.await.unwrap().unwrap();

        // Two ticks' worth of fan-out, both sites present in each.
        assert_eq!(urls.iter().filter(|u| *u == "http://a.com").count(), 2);
        assert_eq!(urls.iter().filter(|u| *u == "http://b.com").count(), 2);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let store = seeded_store(&["http://a.com"]).await;
        let broker = Arc::new(MemoryBroker::new());

        let scheduler = Scheduler::new(store, broker, test_config(Duration::from_secs(60)));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), scheduler.run(shutdown))
            .await
            .expect("run did not observe cancellation")
            .unwrap();
    }

    /// Store whose monitored-set query always fails.
    struct BrokenStore;

    #[async_trait]
    impl Repository for BrokenStore {
        async fn add_site(&self, _url: &str) -> RepoResult<()> {
            unimplemented!()
        }
        async fn add_site_from_chat(&self, _chat_id: i64, _url: &str) -> RepoResult<()> {
            unimplemented!()
        }
        async fn delete_site_by_id(&self, _id: i64) -> RepoResult<()> {
            unimplemented!()
        }
        async fn delete_site_from_chat(&self, _chat_id: i64, _url: &str) -> RepoResult<()> {
            unimplemented!()
        }
        async fn site_by_id(&self, _id: i64) -> RepoResult<Site> {
            unimplemented!()
        }
        async fn all_sites(&self) -> RepoResult<Vec<Site>> {
            unimplemented!()
        }
        async fn monitored_sites(&self) -> RepoResult<Vec<Site>> {
            Err(RepoError::QueryFailed("store is down".to_string()))
        }
        async fn sites_by_chat_id(&self, _chat_id: i64) -> RepoResult<Vec<Site>> {
            unimplemented!()
        }
        async fn add_result(&self, _result: &CheckResult) -> RepoResult<()> {
            unimplemented!()
        }
        async fn last_results_for_site(
            &self,
            _site: &Site,
            _n: u32,
        ) -> RepoResult<Vec<CheckResult>> {
            unimplemented!()
        }
        async fn second_to_last_successful_for_site(
            &self,
            _site: &Site,
        ) -> RepoResult<Option<CheckResult>> {
            unimplemented!()
        }
        async fn upsert_chat(&self, _chat: &crate::model::Chat) -> RepoResult<()> {
            unimplemented!()
        }
        async fn set_chat_subscribed(&self, _chat_id: i64, _subscribed: bool) -> RepoResult<()> {
            unimplemented!()
        }
        async fn chats_subscribed_to_url(&self, _url: &str) -> RepoResult<Vec<crate::model::Chat>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn fetch_failure_ends_only_the_tick() {
        let broker = Arc::new(MemoryBroker::new());
        let scheduler = Scheduler::new(
            Arc::new(BrokenStore),
            broker,
            test_config(Duration::from_millis(10)),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });

        // Survive several failing ticks, then stop cleanly.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    /// Broker that rejects the first publish and delegates the rest.
    struct FlakyBroker {
        inner: MemoryBroker,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl MessageBroker for FlakyBroker {
        async fn consume_sites(&self) -> BrokerResult<MessageStream> {
            self.inner.consume_sites().await
        }
        async fn consume_results(&self) -> BrokerResult<MessageStream> {
            self.inner.consume_results().await
        }
        async fn consume_notifications(&self) -> BrokerResult<MessageStream> {
            self.inner.consume_notifications().await
        }
        async fn publish_site(&self, site: &Site) -> BrokerResult<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(crate::broker::BrokerError::PublishFailed(
                    "broker is down".to_string(),
                ));
            }
            self.inner.publish_site(site).await
        }
        async fn publish_result(&self, result: &CheckResult) -> BrokerResult<()> {
            self.inner.publish_result(result).await
        }
        async fn publish_notification(&self, notification: &Notification) -> BrokerResult<()> {
            self.inner.publish_notification(notification).await
        }
        async fn close(&self) -> BrokerResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_failure_does_not_abort_the_tick() {
        let store = seeded_store(&["http://a.com", "http://b.com"]).await;
        let broker = Arc::new(FlakyBroker {
            inner: MemoryBroker::new(),
            failures_left: AtomicUsize::new(1),
        });
        let stream = broker.consume_sites().await.unwrap();

        let scheduler = Scheduler::new(
            store,
            broker,
            test_config(Duration::from_millis(10)),
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });

        // First tick: one publish fails, the other site still arrives.
        // Second tick: both sites retried.
        let mut urls = Vec::new();
        for _ in 0..3 {
            let payload = tokio::time::timeout(Duration::from_secs(1), stream.recv())
                .await
                .unwrap()
                .unwrap();
            let site: Site = serde_json::from_slice(&payload).unwrap();
            urls.push(site.url);
        }

        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert!(urls.contains(&"http://a.com".to_string()));
        assert!(urls.contains(&"http://b.com".to_string()));
    }
}
