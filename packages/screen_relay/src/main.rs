use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use screen_relay::config::{DuplicateHostPolicy, FileConfig, RelayConfig, load_config};
use screen_relay::{AppState, create_router};

#[derive(Parser)]
#[command(name = "screen-relay")]
#[command(about = "Rendezvous relay for live screen streaming and remote control")]
struct Cli {
    /// Config file (defaults to ./relay.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Override how a second registration of a live host id is handled
    #[arg(long, value_enum)]
    duplicate_host_policy: Option<DuplicateHostPolicy>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG takes precedence over the flag
    let default_directive = if cli.debug {
        "screen_relay=debug,tower_http=debug"
    } else {
        "screen_relay=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut file_config: FileConfig = load_config(cli.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;

    if let Some(host) = cli.host {
        file_config.server.host = host;
    }
    if let Some(port) = cli.port {
        file_config.server.port = port;
    }
    if let Some(policy) = cli.duplicate_host_policy {
        file_config.relay.duplicate_host_policy = policy;
    }

    let relay_config = RelayConfig::from_file(&file_config.relay);
    info!(
        send_timeout_ms = relay_config.send_timeout.as_millis() as u64,
        send_queue_capacity = relay_config.send_queue_capacity,
        duplicate_host_policy = ?relay_config.duplicate_host_policy,
        "Starting screen relay"
    );

    let app = create_router(AppState::new(relay_config));

    let server = &file_config.server;
    let listener = tokio::net::TcpListener::bind((server.host.as_str(), server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", server.host, server.port))?;
    let actual_addr = listener.local_addr()?;

    info!("Screen relay listening on ws://{}", actual_addr);
    info!("  WS     /  or /ws      - Host and viewer connections");
    info!("  GET    /health        - Health check");
    info!("  GET    /metrics       - Relay metrics");
    info!("  GET    /api/hosts     - Live hosts");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, stopping");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Screen relay stopped");
    Ok(())
}
