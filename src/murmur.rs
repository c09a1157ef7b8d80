use std::sync::Arc;

use anyhow::{Context, Result};
use murmur::process::TranscriptionPipeline;
use murmur::server::create_router;
use murmur::{ConfigManager, DEFAULT_LOG_LEVEL, OpenAIClient, OpenAIConfig, VERSION};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MURMUR_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .init();

    // Load config
    let config_manager = ConfigManager::new()?;
    // defaults are written before env overrides, which are never persisted
    let mut config = config_manager.load_or_init()?;
    config.apply_env();
    config.validate()?;

    let api_key = config.require_key_openai(config_manager.config_path())?;

    let client = OpenAIClient::new(
        OpenAIConfig::new(api_key)
            .with_base_url(config.base_url())
            .with_timeout(config.request_timeout()),
    )?;

    let scratch_dir = config.scratch_dir();
    tokio::fs::create_dir_all(&scratch_dir)
        .await
        .with_context(|| format!("Failed to create scratch directory at {scratch_dir:?}"))?;

    let pipeline = Arc::new(TranscriptionPipeline::from_config(&config, Arc::new(client)));
    let app = create_router(pipeline);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        version = VERSION,
        addr = %addr,
        model = config.model(),
        scratch_dir = ?scratch_dir,
        max_upload_mb = config.max_upload_mb,
        max_single_file_mb = config.max_single_file_mb,
        max_chunk_secs = config.max_chunk_secs,
        "Murmur ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Murmur stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
