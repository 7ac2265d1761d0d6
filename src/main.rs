use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use s3_gateway::{config::Config, routes::create_router, storage, utils::init_logger, AppState};

/// HTTP front-end over S3 object storage
#[derive(Debug, Parser)]
#[command(name = "s3-gateway", version, about)]
struct Cli {
    /// Settings file (TOML, YAML or JSON); defaults to ./settings.* when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref()).context("Invalid configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let _log_guard = init_logger(&config.logging);
    info!("Configuration loaded: {:?}", config.server);

    // Storage client is built once here and shared by every request
    let backend = storage::build_backend(&config.s3).context("Failed to configure storage backend")?;
    info!(
        provider = config.s3.provider.as_str(),
        region = %backend.region(),
        "Storage backend ready"
    );

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = AppState::new(config, backend).context("Failed to build application state")?;
    let app = create_router(state);

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
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
