//! frame-echo: a fragmenting binary echo channel
//!
//! A client generates self-describing binary messages, sends them over a
//! framed TCP channel, and validates the echoes sent back by the server.
//!
//! Features:
//! - Messages larger than a frame are fragmented and reassembled
//! - Single-frame messages are delivered without copying
//! - Length and content validation on both sides
//! - Configuration via CLI arguments or TOML file

use frame_echo::config::{Config, Role};
use frame_echo::{server, session};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        path = %config.path,
        role = ?config.role,
        max_frame_size = config.max_frame_size,
        "Starting frame-echo"
    );

    match config.role {
        Role::Demo => run_demo(config).await,
        Role::Server => run_server(config).await,
        Role::Client => run_client(config).await,
    }
}

/// Server and client in one process; exits after one batch.
async fn run_demo(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tokio::select! {
        result = session::run_demo(&config) => {
            result?;
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    }
}

/// Echo server until Ctrl-C.
async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = server::Server::bind(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
        info!("Shutting down");
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await?;
    Ok(())
}

/// One batch against a remote server.
async fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    session::run_batch(&config).await?;
    Ok(())
}
