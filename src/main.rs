//! Model Gateway - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use model_gateway::{
    GatewayConfig, ModelKind, NvidiaSmiProbe, ReferenceRuntime, api, metrics,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "model-gateway")]
#[command(about = "Local model-serving gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Override model cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting Model Gateway");

    // Load configuration
    let mut config = GatewayConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }

    config.validate()?;

    tracing::info!(
        api_port = config.api_port,
        cache_dir = %config.cache_dir.display(),
        default_embedding_model = ?config.default_embedding_model,
        default_chat_model = ?config.default_chat_model,
        quantizer_configured = config.quantize_command.is_some(),
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    let bind = (config.api_host.clone(), config.api_port);
    let preload = config
        .preload_embedding_model
        .then(|| config.default_embedding_model.clone())
        .flatten();

    let app_state = api::AppState::new(
        config,
        Arc::new(ReferenceRuntime::new()),
        Arc::new(NvidiaSmiProbe::new()),
        prometheus_handle,
    );

    // Initial discovery pass
    let scanner = app_state.scanner.clone();
    let report = tokio::task::spawn_blocking(move || scanner.scan())
        .await
        .context("Initial cache scan panicked")?;
    match &report.error {
        Some(error) => tracing::warn!(error = %error, "Initial cache scan incomplete"),
        None => tracing::info!(
            total_models = report.total_models,
            usable = report.models.iter().filter(|m| m.usable).count(),
            "Initial cache scan complete"
        ),
    }

    if let Some(model) = preload {
        match app_state.manager.load(&model, ModelKind::Embedding).await {
            Ok(_) => tracing::info!(model = %model, "Default embedding model preloaded"),
            Err(e) => tracing::warn!(
                model = %model,
                error = %e,
                "Failed to preload default embedding model"
            ),
        }
    }

    let manager = app_state.manager.clone();
    let app = api::create_router(app_state);

    let listener = tokio::net::TcpListener::bind((bind.0.as_str(), bind.1))
        .await
        .context("Failed to bind API server")?;
    tracing::info!(addr = %listener.local_addr()?, "Starting API server");

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutting down...");
    manager.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
