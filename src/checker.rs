//! Checker: the probe worker pool
//!
//! `N` workers share one consumer stream from the `sites` queue. Each
//! worker takes a site, performs a single `GET` with a deadline,
//! persists the outcome and forwards it to the `results` queue.
//!
//! The store is written before the queue: if the publish then fails,
//! the result already exists and the alerter will observe it on the
//! next transition. A probe failure is data (a result with null code
//! and latency), never an error; a store or publish failure is fatal
//! to the worker and, errgroup-style, takes the whole pool down so
//! the supervisor can restart the process.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{MessageBroker, MessageStream};
use crate::config::CheckerConfig;
use crate::model::{CheckResult, NullableInt, Site};
use crate::repository::Repository;

#[derive(Clone)]
pub struct Checker {
    store: Arc<dyn Repository>,
    broker: Arc<dyn MessageBroker>,
    client: reqwest::Client,
    config: CheckerConfig,
}

impl Checker {
    pub fn new(
        store: Arc<dyn Repository>,
        broker: Arc<dyn MessageBroker>,
        config: CheckerConfig,
    ) -> Self {
        Self {
            store,
            broker,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Run the worker pool until `shutdown` is cancelled, the queue
    /// closes, or a worker hits a fatal error.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let stream = self.broker.consume_sites().await?;
        info!("checker started with {} workers", self.config.workers);

        let workers_token = shutdown.child_token();
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let checker = self.clone();
            let stream = stream.clone();
            let token = workers_token.clone();
            workers.spawn(async move { checker.worker(id, stream, token).await });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(anyhow!("worker panicked: {e}")));
            if let Err(e) = outcome {
                if first_error.is_none() {
                    // First failure cancels the remaining workers.
                    workers_token.cancel();
                    first_error = Some(e);
                } else {
                    error!("error from worker: {e:#}");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("checker stopped");
                Ok(())
            }
        }
    }

    async fn worker(
        &self,
        id: usize,
        stream: MessageStream,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            let payload = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                payload = stream.recv() => match payload {
                    Some(payload) => payload,
                    // Queue closed: clean exit.
                    None => {
                        debug!(worker = id, "site stream closed");
                        return Ok(());
                    }
                },
            };

            let site: Site =
                serde_json::from_slice(&payload).context("failed to parse site message")?;
            self.handle_site(site).await?;
        }
    }

    async fn handle_site(&self, site: Site) -> anyhow::Result<()> {
        let result = self.probe(site).await;

        time::timeout(
            self.config.common.db_query_timeout,
            self.store.add_result(&result),
        )
        .await
        .context("result insert timed out")?
        .context("failed to send check result to the store")?;

        time::timeout(
            self.config.common.broker_timeout,
            self.broker.publish_result(&result),
        )
        .await
        .context("result publish timed out")?
        .context("failed to send check result to the broker")?;

        Ok(())
    }

    /// One `GET` against the site. Every outcome is a result: an HTTP
    /// response carries its status and latency whatever the status
    /// class; a transport failure (DNS, connect, TLS, timeout) carries
    /// neither.
    async fn probe(&self, site: Site) -> CheckResult {
        let time = Utc::now();
        let started = std::time::Instant::now();

        let response = self
            .client
            .get(&site.url)
            .timeout(self.config.common.site_response_timeout)
            .send()
            .await;
        let latency = started.elapsed().as_millis() as i64;

        match response {
            Ok(response) => {
                let code = response.status().as_u16() as i64;
                debug!(url = %site.url, code, latency, "site checked");
                CheckResult {
                    site,
                    time,
                    latency: NullableInt::some(latency),
                    code: NullableInt::some(code),
                }
            }
            Err(e) => {
                warn!(url = %site.url, "unsuccessful checking of site: {e}");
                CheckResult {
                    site,
                    time,
                    latency: NullableInt::NONE,
                    code: NullableInt::NONE,
                }
            }
        }
    }
}
