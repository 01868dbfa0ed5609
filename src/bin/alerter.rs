use sitewatch::alerter::Alerter;
use sitewatch::config::AlerterConfig;
use sitewatch::{broker, repository};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("sitewatch", LevelFilter::DEBUG),
        ("alerter", LevelFilter::DEBUG),
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
    let config = AlerterConfig::from_env()?;

    let store = repository::connect(&config.common).await?;
    let broker = broker::connect(&config.common, 1).await?;

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

    info!("starting alert service");
    let outcome = Alerter::new(store, broker.clone(), config)?
        .run(shutdown)
        .await;

    if let Err(e) = broker.close().await {
        error!("failed to close broker connection: {e}");
    }
    outcome
}
