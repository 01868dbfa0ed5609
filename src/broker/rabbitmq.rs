//! RabbitMQ adapter (lapin)
//!
//! One connection and one channel per process. The three queues are
//! declared non-durable at connect; consumers run with auto-ack and a
//! spawned pump forwards deliveries into the process-local
//! [`MessageStream`]. Losing the connection ends the pump, the stream
//! drains and the stage's supervisor restarts the process.

use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use super::error::{BrokerError, BrokerResult};
use super::{MessageBroker, MessageStream, NOTIFICATIONS_QUEUE, RESULTS_QUEUE, SITES_QUEUE};
use crate::model::{CheckResult, Notification, Site};

pub struct RabbitBroker {
    conn: Connection,
    channel: Channel,
}

impl RabbitBroker {
    /// Connect, set the channel QoS and declare the three queues.
    #[instrument(skip_all)]
    pub async fn connect(config: &crate::config::RabbitMqConfig, prefetch: u16) -> BrokerResult<Self> {
        info!("connecting to RabbitMQ at {}:{}", config.host, config.port);

        let conn = Connection::connect(&config.url(), ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::ConnectFailed(e.to_string()))?;

        for queue in [SITES_QUEUE, RESULTS_QUEUE, NOTIFICATIONS_QUEUE] {
            channel
                .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
                .await
                .map_err(|e| {
                    BrokerError::ConnectFailed(format!("failed to declare queue {queue}: {e}"))
                })?;
        }

        Ok(Self { conn, channel })
    }

    async fn consume(&self, queue: &'static str) -> BrokerResult<MessageStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConsumeFailed(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut consumer = consumer;
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        if tx.send(delivery.data).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("consumer on {queue} failed: {e}");
                        break;
                    }
                }
            }
            debug!("consumer pump on {queue} stopped");
        });

        Ok(MessageStream::new(rx))
    }

    async fn publish<T: Serialize>(&self, queue: &str, payload: &T) -> BrokerResult<()> {
        let body = serde_json::to_vec(payload)?;

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageBroker for RabbitBroker {
    async fn consume_sites(&self) -> BrokerResult<MessageStream> {
        self.consume(SITES_QUEUE).await
    }

    async fn consume_results(&self) -> BrokerResult<MessageStream> {
        self.consume(RESULTS_QUEUE).await
    }

    async fn consume_notifications(&self) -> BrokerResult<MessageStream> {
        self.consume(NOTIFICATIONS_QUEUE).await
    }

    async fn publish_site(&self, site: &Site) -> BrokerResult<()> {
        self.publish(SITES_QUEUE, site).await
    }

    async fn publish_result(&self, result: &CheckResult) -> BrokerResult<()> {
        self.publish(RESULTS_QUEUE, result).await
    }

    async fn publish_notification(&self, notification: &Notification) -> BrokerResult<()> {
        self.publish(NOTIFICATIONS_QUEUE, notification).await
    }

    async fn close(&self) -> BrokerResult<()> {
        self.channel
            .close(200, "bye")
            .await
            .map_err(|e| BrokerError::Closed(e.to_string()))?;
        self.conn
            .close(200, "bye")
            .await
            .map_err(|e| BrokerError::Closed(e.to_string()))?;
        Ok(())
    }
}
