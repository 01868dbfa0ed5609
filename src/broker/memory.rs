//! In-process broker (no external dependencies)
//!
//! Three unbounded channels behind the [`MessageBroker`] trait. FIFO
//! per queue, shared consumption through the same [`MessageStream`]
//! the RabbitMQ adapter hands out, enough to run the whole
//! pipeline inside one test process.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use super::error::{BrokerError, BrokerResult};
use super::{MessageBroker, MessageStream};
use crate::model::{CheckResult, Notification, Site};

struct Queue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    stream: MessageStream,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            stream: MessageStream::new(rx),
        }
    }

    fn publish<T: Serialize>(&self, payload: &T) -> BrokerResult<()> {
        let body = serde_json::to_vec(payload)?;
        self.tx
            .send(body)
            .map_err(|_| BrokerError::Closed("queue receiver dropped".to_string()))
    }
}

pub struct MemoryBroker {
    sites: Queue,
    results: Queue,
    notifications: Queue,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            sites: Queue::new(),
            results: Queue::new(),
            notifications: Queue::new(),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn consume_sites(&self) -> BrokerResult<MessageStream> {
        Ok(self.sites.stream.clone())
    }

    async fn consume_results(&self) -> BrokerResult<MessageStream> {
        Ok(self.results.stream.clone())
    }

    async fn consume_notifications(&self) -> BrokerResult<MessageStream> {
        Ok(self.notifications.stream.clone())
    }

    async fn publish_site(&self, site: &Site) -> BrokerResult<()> {
        self.sites.publish(site)
    }

    async fn publish_result(&self, result: &CheckResult) -> BrokerResult<()> {
        self.results.publish(result)
    }

    async fn publish_notification(&self, notification: &Notification) -> BrokerResult<()> {
        self.notifications.publish(notification)
    }

    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }
}
