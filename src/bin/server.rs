//! Message ingestion server
//! Receives grouped message events over HTTP and bulk-writes them to the warehouse

use anyhow::{Context, Result};
use clap::Parser;
use message_ingest::config::{ServerArgs, ServerConfig, SinkConfig};
use message_ingest::ingestion::IngestionOrchestrator;
use message_ingest::server::{serve, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_args(ServerArgs::parse());

    match &config.sink {
        SinkConfig::BigQuery(cfg) => info!(
            project = %cfg.project_id,
            dataset = %cfg.dataset,
            table = %cfg.table,
            "Writing to BigQuery"
        ),
        SinkConfig::Memory => warn!("Using in-memory sink; rows are not persisted"),
    }

    // One sink handle for the whole process, injected into the orchestrator
    let sink = config.build_sink().context("Failed to initialize sink")?;
    let orchestrator = IngestionOrchestrator::with_options(sink, config.options.clone());
    info!(
        sink = orchestrator.sink_name(),
        sort_by_timestamp = orchestrator.options().sort_by_timestamp,
        require_fields = orchestrator.options().require_fields,
        "Ingestion pipeline ready"
    );
    let state = Arc::new(AppState {
        orchestrator,
        settings: config.settings.clone(),
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Ingestion service listening on http://{}", config.bind_addr);

    serve(listener, state).await.context("Server loop failed")?;
    Ok(())
}
