//! The message broker contract and its adapters
//!
//! Three named queues couple the pipeline's stages:
//!
//! ```text
//! Scheduler ──sites──► Checker ──results──► Alerter ──notifications──► Notifier
//! ```
//!
//! The [`MessageBroker`] trait hides the driver. Publishes are typed
//! (the adapter serializes to the JSON wire format); consumption hands
//! back a [`MessageStream`] of raw payloads that any number of workers
//! may share; the stage owns deserialization, so a malformed message
//! surfaces where it is handled.
//!
//! Queues are non-durable and consumed with auto-ack: the model is
//! at-least-once via redelivery after a reconnect, and the durable
//! source of truth stays in the store.

pub mod error;
pub mod memory;
pub mod rabbitmq;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::config::{BrokerKind, CommonConfig, RabbitMqConfig};
use crate::model::{CheckResult, Notification, Site};

pub use error::{BrokerError, BrokerResult};
pub use memory::MemoryBroker;
pub use rabbitmq::RabbitBroker;

pub const SITES_QUEUE: &str = "sites";
pub const RESULTS_QUEUE: &str = "results";
pub const NOTIFICATIONS_QUEUE: &str = "notifications";

/// A shared handle onto one queue's consumer.
///
/// Clones all drain the same underlying receiver, which is what gives
/// the checker its "N cooperative workers on one logical queue" shape.
/// `recv` returns `None` once the consumer behind it has stopped.
#[derive(Clone)]
pub struct MessageStream {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl MessageStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }
}

/// Publish/consume contract over the three pipeline queues.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn consume_sites(&self) -> BrokerResult<MessageStream>;
    async fn consume_results(&self) -> BrokerResult<MessageStream>;
    async fn consume_notifications(&self) -> BrokerResult<MessageStream>;

    async fn publish_site(&self, site: &Site) -> BrokerResult<()>;
    async fn publish_result(&self, result: &CheckResult) -> BrokerResult<()>;
    async fn publish_notification(&self, notification: &Notification) -> BrokerResult<()>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Connect the broker selected by `MESSAGE_BROKER`.
///
/// `prefetch` bounds the per-consumer in-flight count; stages with a
/// single consumer loop pass 1, the checker passes its worker count.
pub async fn connect(
    common: &CommonConfig,
    prefetch: u16,
) -> anyhow::Result<Arc<dyn MessageBroker>> {
    match common.message_broker {
        BrokerKind::RabbitMq => {
            let config = RabbitMqConfig::from_env();
            Ok(Arc::new(RabbitBroker::connect(&config, prefetch).await?))
        }
    }
}
