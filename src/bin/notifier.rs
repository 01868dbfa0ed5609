use std::sync::Arc;

use sitewatch::config::NotifierConfig;
use sitewatch::notifier::telegram::{self, BotContext};
use sitewatch::notifier::{Notifier, TelegramBot};
use sitewatch::{broker, repository};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("sitewatch", LevelFilter::DEBUG),
        ("notifier", LevelFilter::DEBUG),
        ("teloxide", LevelFilter::WARN),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let config = NotifierConfig::from_env()?;

    let store = repository::connect(&config.common).await?;
    let broker = broker::connect(&config.common, 1).await?;

    let platform = Arc::new(TelegramBot::new(&config.token));
    let bot = platform.bot();
    let context = Arc::new(BotContext {
        store: store.clone(),
        db_query_timeout: config.common.db_query_timeout,
    });

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("unable to listen for shutdown signal: {e}");
            }
            shutdown.cancel();
        }
    });

    info!("starting telegram bot");
    let dispatcher = tokio::spawn(telegram::run_dispatcher(bot, context, shutdown.clone()));

    info!("starting notifier service");
    let notifier = Notifier::new(store, broker.clone(), platform, config);
    let outcome = notifier.run(shutdown.clone()).await;

    // Whichever way the consumer ended, take the dispatcher with it.
    shutdown.cancel();
    if let Err(e) = dispatcher.await {
        warn!("dispatcher task failed: {e}");
    }

    if let Err(e) = broker.close().await {
        error!("failed to close broker connection: {e}");
    }
    outcome
}
