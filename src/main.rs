use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use telemetry_feed::{
    config::Config,
    demo::run_demo_producer,
    feed::Feed,
    logging::init_logging,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_logging();

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    info!("Starting telemetry feed");
    info!(capacity = config.capacity, "History capacity");
    info!(address = %config.bind_addr(), "Bind address");
    info!(
        heartbeat_secs = config.heartbeat_secs,
        consumer_buffer = config.consumer_buffer,
        "Live channel"
    );

    let feed = Feed::new(config.capacity, config.consumer_buffer);
    feed.channel().spawn_heartbeat(config.heartbeat_interval()).await;

    let producer = if config.demo {
        Some(tokio::spawn(run_demo_producer(feed.clone(), config.demo_interval())))
    } else {
        info!("Demo mode off, waiting for an external producer");
        None
    };

    let state = AppState::new(feed.clone());
    server::start_server(
        state,
        &config.bind_addr(),
        config.frontend_dir.as_deref(),
        shutdown_signal(feed, producer),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// Resolves on ctrl-c after stopping the producer and closing every
/// live channel client.
async fn shutdown_signal(feed: Feed, producer: Option<JoinHandle<()>>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    info!("Shutdown requested");
    if let Some(handle) = producer {
        handle.abort();
    }
    feed.shutdown().await;
}
