use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod dashboard;
mod db;
mod hub;
mod live_scores;
mod notify;
mod standings;
#[cfg(test)]
mod testing;

use config::Config;
use dashboard::AppState;
use db::Database;
use hub::LiveHub;
use live_scores::{ApiFootball, FixtureProvider};
use notify::LogNotifier;
use standings::{Reconciler, StandingsCache};

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

    if config.offline {
        warn!("🟡 OFFLINE mode – upstream calls will fail and be retried");
    }

    // Open database
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let provider: Arc<dyn FixtureProvider> = Arc::new(ApiFootball::new(
        config.api_football_key.as_deref(),
        &config.api_football_url,
    )?);
    info!("Upstream provider: {} ({})", provider.name(), config.api_football_url);

    let store = Arc::new(db.clone());
    let hub = Arc::new(LiveHub::new(
        Arc::clone(&provider),
        store.clone(),
        Arc::new(LogNotifier),
        config.poll_settings(),
        config.sink_settings(),
    ));
    let reconciler = Reconciler::new(
        provider,
        store,
        StandingsCache::new(),
        config.poll_settings(),
        config.standings_settings(),
    );

    for key in &config.reconcile {
        reconciler.start(*key);
    }
    if !config.reconcile.is_empty() {
        info!("Standings reconciliation started for {} competition(s)", config.reconcile.len());
    }

    let app = dashboard::router(AppState {
        db,
        hub: Arc::clone(&hub),
        reconciler: Arc::clone(&reconciler),
    });
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Serve until Ctrl-C. Live streams must end for the server to drain, so
    // the hub is shut down as part of the shutdown signal.
    let shutdown_hub = Arc::clone(&hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            shutdown_hub.shutdown();
        })
        .await?;

    reconciler.shutdown();
    info!("Stopped");

    Ok(())
}
