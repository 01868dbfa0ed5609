use sitewatch::api::{self, ApiState};
use sitewatch::config::ServerConfig;
use sitewatch::repository;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("sitewatch", LevelFilter::DEBUG),
        ("server", LevelFilter::DEBUG),
        ("tower_http", LevelFilter::DEBUG),
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
    let config = ServerConfig::from_env()?;

    let store = repository::connect(&config.common).await?;
    let state = ApiState {
        store,
        db_query_timeout: config.common.db_query_timeout,
    };

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

    api::spawn_server(&config.address, state, shutdown.clone()).await?;

    shutdown.cancelled().await;
    info!("admin API stopped");
    Ok(())
}
