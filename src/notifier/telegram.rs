//! Telegram bot: chat commands and the `send` contract
//!
//! The bot carries two duties: it is the [`ChatPlatform`] the delivery
//! loop sends through, and it hosts the command dispatcher
//! (`/start /subscribe /unsubscribe /add /delete /list`) that manages
//! subscriptions. Command handling is a thin teloxide shim over
//! [`respond`], which holds the actual semantics and is what the tests
//! drive.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use teloxide::utils::command::BotCommands;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::ChatPlatform;
use crate::model::Chat;
use crate::repository::Repository;
use crate::url;

const HELP_TEXT: &str = "Commands:
/subscribe - subscribe to updates
/unsubscribe - unsubscribe from updates
/add [url] - start monitoring [url] site
/delete [url] - stop monitoring [url] site
/list - get all monitored sites";

/// The teloxide-backed chat platform.
pub struct TelegramBot {
    bot: Bot,
}

impl TelegramBot {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl ChatPlatform for TelegramBot {
    async fn send(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .context("telegram send failed")?;
        Ok(())
    }
}

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    Start,
    Subscribe,
    Unsubscribe,
    Add(String),
    Delete(String),
    List,
}

/// Dependencies the command handlers pull out of the dispatcher.
pub struct BotContext {
    pub store: Arc<dyn Repository>,
    pub db_query_timeout: Duration,
}

/// Run the command dispatcher until `shutdown` is cancelled.
pub async fn run_dispatcher(bot: Bot, context: Arc<BotContext>, shutdown: CancellationToken) {
    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![context])
        .default_handler(|_| async {})
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        if let Ok(stop) = token.shutdown() {
            stop.await;
        }
    });

    dispatcher.dispatch().await;
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    command: Command,
    context: Arc<BotContext>,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    info!(chat_id = chat_id.0, command = ?command, "bot command");

    let reply = respond(
        &context.store,
        context.db_query_timeout,
        chat_id.0,
        command,
    )
    .await;

    if let Some(reply) = reply {
        bot.send_message(chat_id, reply).await?;
    }
    Ok(())
}

/// Apply one chat command against the store and produce the reply, if
/// any. A repository failure is logged and swallowed; the chat gets
/// no reply rather than an internal error.
pub(crate) async fn respond(
    store: &Arc<dyn Repository>,
    db_query_timeout: Duration,
    chat_id: i64,
    command: Command,
) -> Option<String> {
    match command {
        Command::Start => Some(HELP_TEXT.to_string()),

        Command::Subscribe => {
            let chat = Chat {
                id: chat_id,
                is_subscribed: true,
            };
            match time::timeout(db_query_timeout, store.upsert_chat(&chat)).await {
                Ok(Ok(())) => Some("Successful!".to_string()),
                outcome => {
                    error!(chat_id, command = "subscribe", "failed to add chat: {outcome:?}");
                    None
                }
            }
        }

        Command::Unsubscribe => {
            match time::timeout(db_query_timeout, store.set_chat_subscribed(chat_id, false)).await
            {
                Ok(Ok(())) => Some("Successful!".to_string()),
                outcome => {
                    error!(
                        chat_id,
                        command = "unsubscribe",
                        "failed to update chat: {outcome:?}"
                    );
                    None
                }
            }
        }

        Command::Add(raw) => {
            let url = match url::normalize(raw.trim()) {
                Ok(url) => url,
                Err(e) => {
                    error!(chat_id, command = "add", "{e}");
                    return Some("Invalid URL!".to_string());
                }
            };
            match time::timeout(db_query_timeout, store.add_site_from_chat(chat_id, &url)).await {
                Ok(Ok(())) => Some("Successful!".to_string()),
                outcome => {
                    error!(chat_id, command = "add", "failed to add site: {outcome:?}");
                    None
                }
            }
        }

        Command::Delete(raw) => {
            let url = match url::normalize(raw.trim()) {
                Ok(url) => url,
                Err(e) => {
                    error!(chat_id, command = "delete", "{e}");
                    return Some("Invalid URL!".to_string());
                }
            };
            match time::timeout(db_query_timeout, store.delete_site_from_chat(chat_id, &url)).await
            {
                Ok(Ok(())) => Some("Successful!".to_string()),
                outcome => {
                    error!(
                        chat_id,
                        command = "delete",
                        "failed to delete site: {outcome:?}"
                    );
                    None
                }
            }
        }

        Command::List => {
            let sites = match time::timeout(db_query_timeout, store.sites_by_chat_id(chat_id)).await
            {
                Ok(Ok(sites)) => sites,
                outcome => {
                    error!(chat_id, command = "list", "failed to list sites: {outcome:?}");
                    return None;
                }
            };

            if sites.is_empty() {
                return Some("You are not subscribed to any site".to_string());
            }

            let mut reply = String::new();
            for (i, site) in sites.iter().enumerate() {
                reply.push_str(&format!("{}) {}\n", i + 1, site.url));
            }
            Some(reply)
        }
    }
}
