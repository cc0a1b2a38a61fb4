// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use bess_analytics::application::engine::AnalyticsEngine;
use bess_analytics::application::history_repository::HistoryRepository;
use bess_analytics::infrastructure::config::{load_app_config, StorageBackend};
use bess_analytics::infrastructure::file_repository::FileHistoryRepository;
use bess_analytics::infrastructure::memory_repository::MemoryHistoryRepository;
use bess_analytics::presentation::app_state::AppState;
use bess_analytics::presentation::handlers::router;

const DEFAULT_CONFIG_PATH: &str = "config/analytics";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path =
        std::env::var("BESS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let app_config = load_app_config(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    // Initialize tracing; RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&app_config.logging.filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Create repository (infrastructure layer)
    let repository: Arc<dyn HistoryRepository> = match app_config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryHistoryRepository::new()),
        StorageBackend::File => {
            Arc::new(FileHistoryRepository::open(&app_config.storage.path).await?)
        }
    };
    tracing::info!("Using {:?} history storage", app_config.storage.backend);

    // Create engine (application layer)
    let engine = AnalyticsEngine::new(app_config.analytics(), repository)?;
    let state = Arc::new(AppState { engine });

    // Build router (presentation layer)
    let router = router(state).layer(TraceLayer::new_for_http());

    // Start server
    let bind = format!("{}:{}", app_config.server.host, app_config.server.port);
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {}", bind))?;
    tracing::info!("Starting bess-analytics service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
