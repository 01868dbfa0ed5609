use sitewatch::checker::Checker;
use sitewatch::config::CheckerConfig;
use sitewatch::{broker, repository};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("sitewatch", LevelFilter::DEBUG),
        ("checker", LevelFilter::DEBUG),
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
    let config = CheckerConfig::from_env()?;

    let store = repository::connect(&config.common).await?;
    // Workers share one consumer; the prefetch window matches the pool.
    let prefetch = u16::try_from(config.workers).unwrap_or(u16::MAX);
    let broker = broker::connect(&config.common, prefetch).await?;

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

    info!("starting checker service");
    let outcome = Checker::new(store, broker.clone(), config).run(shutdown).await;

    if let Err(e) = broker.close().await {
        error!("failed to close broker connection: {e}");
    }
    outcome
}
