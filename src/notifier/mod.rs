//! Notifier: delivery of transition messages to subscribers
//!
//! Two cooperating loops run under one supervisor: the
//! `notifications` consumer implemented here, and the Telegram command
//! dispatcher in [`telegram`]. The chat platform hides behind the
//! [`ChatPlatform`] trait so delivery can be exercised without a bot
//! token.
//!
//! Delivery policy: a failed send to one chat is logged and skipped;
//! the remaining subscribers still receive the message.

pub mod telegram;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::broker::MessageBroker;
use crate::config::NotifierConfig;
use crate::model::{Chat, Notification};
use crate::repository::Repository;

pub use telegram::TelegramBot;

/// The `send(chat_id, text)` contract of the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
}

pub struct Notifier {
    store: Arc<dyn Repository>,
    broker: Arc<dyn MessageBroker>,
    platform: Arc<dyn ChatPlatform>,
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn Repository>,
        broker: Arc<dyn MessageBroker>,
        platform: Arc<dyn ChatPlatform>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            store,
            broker,
            platform,
            config,
        }
    }

    /// Consume notifications until `shutdown` is cancelled.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let stream = self.broker.consume_notifications().await?;
        info!("notifier started");

        loop {
            let payload = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("notifier stopping");
                    return Ok(());
                }
                payload = stream.recv() => payload
                    .context("notifications stream closed")?,
            };

            let notification: Notification =
                serde_json::from_slice(&payload).context("failed to parse notification")?;
            self.deliver(&notification)
                .await
                .context("failed to handle notification")?;
        }
    }

    /// Send `notification` to every subscribed chat bound to its URL.
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        let chats = self.subscribers(&notification.url).await?;

        for chat in chats {
            info!(
                chat_id = chat.id,
                message = %notification.message,
                "sending notification to subscriber"
            );
            if let Err(e) = self.platform.send(chat.id, &notification.message).await {
                // Skip this chat, keep the rest informed.
                error!(chat_id = chat.id, "failed to send message to chat: {e:#}");
            }
        }

        Ok(())
    }

    async fn subscribers(&self, url: &str) -> anyhow::Result<Vec<Chat>> {
        let chats = time::timeout(
            self.config.common.db_query_timeout,
            self.store.chats_subscribed_to_url(url),
        )
        .await
        .context("subscribers query timed out")??;
        Ok(chats)
    }
}
