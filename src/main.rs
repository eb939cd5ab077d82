use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod config;
mod dashboard;
mod error;
mod live_scores;
mod models;
mod relay;

use config::Config;
use dashboard::AppState;
use live_scores::EspnScoreboard;
use relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let settings = config.poll_settings();
    info!(
        "Polling every {:?} (fetch timeout {:?}, first poll after {:?})",
        settings.poll_interval, settings.fetch_timeout, settings.initial_delay
    );

    let source = EspnScoreboard::new(
        &config.espn_football_url,
        &config.espn_cricket_url,
        settings.fetch_timeout,
    )?;
    let relay = Relay::new(Arc::new(source), settings);

    let app = dashboard::router(AppState {
        relay: relay.clone(),
        default_sport: config.default_sport,
        viewer_buffer: config.viewer_buffer,
    });
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Server running at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run server (blocks until Ctrl-C)
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down poll workers");
    relay.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
