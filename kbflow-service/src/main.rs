use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod blob;
mod config;
mod content;
mod db;
mod error;
mod index;
mod providers;
mod queue;
mod service;
mod sweeper;

use crate::blob::FsBlobStore;
use crate::config::load_static_config;
use crate::db::Database;
use crate::index::MemoryIndexStore;
use crate::providers::ProviderRegistry;
use crate::service::LifecycleService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting kbflow service v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(load_static_config()?);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Static configuration loaded"
    );

    std::fs::create_dir_all(&config.storage.data_dir)?;

    let db_path = config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let blob_root = config.storage.blob_root();
    let blobs = Arc::new(FsBlobStore::new(&blob_root));
    info!(path = %blob_root.display(), "Blob store initialized");

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let service = Arc::new(LifecycleService::new(
        config.clone(),
        db.clone(),
        blobs,
        Arc::new(MemoryIndexStore::new()),
        db,
        Arc::new(ProviderRegistry::new()),
    ));

    let token = CancellationToken::new();
    let sweeper = sweeper::spawn_progress_sweeper(
        service.clone(),
        token.clone(),
        config.sweeper.interval(),
    );

    let app = api::router(service, metrics);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    token.cancel();
    match tokio::time::timeout(config.sweeper.shutdown_grace(), sweeper).await {
        Ok(Ok(())) => info!("Shutdown complete"),
        Ok(Err(e)) => warn!(error = %e, "Progress sweeper panicked"),
        Err(_) => warn!("Progress sweeper did not stop within the grace period"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kbflow_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
