//! Alerter: the health-transition detector
//!
//! One sequential consumer over the `results` queue. For every
//! arriving result the alerter re-reads the last `K+1` persisted
//! results for that site (newest first) and decides whether the site
//! just crossed between up and down. There is no in-memory health
//! state: any number of replicas can run, each decision works from a
//! fresh tail.
//!
//! With `K` the configured run of failures that counts as "down":
//!
//! ```text
//! tail of K,   all failed                → down   (first observed streak)
//! tail of K+1, newest ok, K failed after → up     (recovery)
//! tail of K+1, K failed, oldest ok       → down   (streak after a known success)
//! anything else                          → silence
//! ```
//!
//! The two down branches make the decision idempotent across arrival
//! order; duplicate suppression on replays is the notifier's concern.

use std::sync::Arc;

use anyhow::{Context, ensure};
use chrono::Utc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::broker::MessageBroker;
use crate::config::AlerterConfig;
use crate::model::{CheckResult, Notification, Site};
use crate::repository::Repository;

pub struct Alerter {
    store: Arc<dyn Repository>,
    broker: Arc<dyn MessageBroker>,
    config: AlerterConfig,
}

impl Alerter {
    pub fn new(
        store: Arc<dyn Repository>,
        broker: Arc<dyn MessageBroker>,
        config: AlerterConfig,
    ) -> anyhow::Result<Self> {
        ensure!(
            config.failed_checks_threshold >= 1,
            "number of failed checks must be at least 1"
        );
        Ok(Self {
            store,
            broker,
            config,
        })
    }

    /// Run until `shutdown` is cancelled. Any store or publish error
    /// aborts the loop and is returned to the supervisor; the message
    /// model is at-least-once, so a replay after restart re-evaluates
    /// against the same tail.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let stream = self.broker.consume_results().await?;
        info!(
            "alerter started, failure threshold {}",
            self.config.failed_checks_threshold
        );

        loop {
            let payload = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("alerter stopping");
                    return Ok(());
                }
                payload = stream.recv() => payload
                    .context("results stream closed")?,
            };

            let result: CheckResult =
                serde_json::from_slice(&payload).context("failed to parse check result")?;
            self.evaluate(&result.site)
                .await
                .context("failed to handle check result")?;
            debug!(url = %result.site.url, "check result handled");
        }
    }

    /// Apply the transition rule to the persisted tail for `site` and
    /// publish a notification when it fires.
    async fn evaluate(&self, site: &Site) -> anyhow::Result<()> {
        let k = self.config.failed_checks_threshold;
        let tail = self.last_results(site, (k + 1) as u32).await?;

        if tail.len() < k {
            debug!(url = %site.url, have = tail.len(), "not enough history yet");
            return Ok(());
        }

        let mut message = None;

        if tail.len() == k && all_failed(&tail) {
            info!(url = %site.url, "all checks failed");
            message = Some(down_message(&site.url));
        }

        if tail.len() == k + 1 {
            if tail[0].is_successful() && all_failed(&tail[1..]) {
                info!(url = %site.url, "website is back up");
                message = Some(self.up_message(site).await?);
            } else if all_failed(&tail[..k]) && tail[k].is_successful() {
                message = Some(down_message(&site.url));
            }
        }

        if let Some(message) = message {
            let notification = Notification {
                url: site.url.clone(),
                message,
            };
            info!(url = %notification.url, message = %notification.message, "sending notification");
            self.publish(&notification).await?;
        }
        Ok(())
    }

    /// The recovery text, annotated with how long the site was down
    /// when a previous success exists to measure from.
    async fn up_message(&self, site: &Site) -> anyhow::Result<String> {
        let previous_success = time::timeout(
            self.config.common.db_query_timeout,
            self.store.second_to_last_successful_for_site(site),
        )
        .await
        .context("second-to-last success query timed out")??;

        Ok(match previous_success {
            Some(success) => {
                let minutes = (Utc::now() - success.time).num_minutes();
                format!(
                    "Good news! The website {} is back up after {} minutes.",
                    site.url, minutes
                )
            }
            None => format!("Good news! The website {} is back up.", site.url),
        })
    }

    async fn last_results(&self, site: &Site, n: u32) -> anyhow::Result<Vec<CheckResult>> {
        let tail = time::timeout(
            self.config.common.db_query_timeout,
            self.store.last_results_for_site(site, n),
        )
        .await
        .context("last results query timed out")??;
        Ok(tail)
    }

    async fn publish(&self, notification: &Notification) -> anyhow::Result<()> {
        time::timeout(
            self.config.common.broker_timeout,
            self.broker.publish_notification(notification),
        )
        .await
        .context("notification publish timed out")??;
        Ok(())
    }
}

fn all_failed(results: &[CheckResult]) -> bool {
    results.iter().all(|r| !r.is_successful())
}

fn down_message(url: &str) -> String {
    format!("Bad news. The website {} is temporarily unavailable.", url)
}
