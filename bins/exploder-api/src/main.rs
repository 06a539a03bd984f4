//! Exploder API binary.
//!
//! Opens the RocksDB index, follows the upstream node with the sync
//! coordinator and serves the read API over HTTP until Ctrl+C.

mod config;
mod routes;
mod rpc;
mod upstream;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use exploder_index::source::ChainSource;
use exploder_index::{IndexDb, QueryEngine, SyncCoordinator};

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryEngine>,
    pub hashrates: Arc<dyn upstream::HashrateSource>,
    pub price: Option<Arc<upstream::PriceFeed>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Args::parse().into_config();
    init_logging(&config.log_level, &config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = ?config.indexer.data_dir,
        rpc = %config.rpc.endpoint,
        bind = %config.bind_addr,
        sync = !config.no_sync,
        "Starting exploder-api"
    );

    std::fs::create_dir_all(&config.indexer.data_dir)
        .with_context(|| format!("creating data dir {:?}", config.indexer.data_dir))?;
    let db = Arc::new(
        IndexDb::open(config.indexer.db_path()).context("opening index database")?,
    );
    if let Some(tip) = db.view()?.tip() {
        info!(height = tip.height, hash = %tip.hash, "index tip");
    }

    let rpc = Arc::new(rpc::RpcClient::new(&config.rpc).context("building RPC client")?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut query = QueryEngine::new(Arc::clone(&db), &config.indexer);
    let sync_task = if config.no_sync {
        None
    } else {
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&db),
            Arc::clone(&rpc) as Arc<dyn ChainSource>,
            config.indexer.clone(),
        ));
        query = query.with_progress(coordinator.progress());
        Some(tokio::spawn(coordinator.run(shutdown_rx)))
    };

    let price = match &config.price_url {
        Some(url) => {
            let source = upstream::HttpPriceSource::new(url.clone(), config.rpc.timeout)
                .context("building price feed client")?;
            Some(Arc::new(upstream::PriceFeed::new(Arc::new(source), config.price_ttl)))
        }
        None => None,
    };

    let state = AppState {
        query: Arc::new(query),
        hashrates: rpc,
        price,
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("Explorer API listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            error!(error = %e, "sync task panicked");
        }
    }
    db.flush()?;
    info!("exploder-api shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C and tell background tasks to stop.
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received Ctrl+C, shutting down...");
    // The sync task may not be running.
    let _ = shutdown.send(true);
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
