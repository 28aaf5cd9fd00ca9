//! Session driver: runs one batch exchange end to end.

use rand::Rng;
use std::net::IpAddr;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client;
use crate::config::Config;
use crate::endpoint::DriveReport;
use crate::error::Result;
use crate::message::{generate, Message};
use crate::server::Server;

/// Connect to the configured server, send one generated batch, and wait
/// until every echo has been received and validated.
pub async fn run_batch(config: &Config) -> Result<DriveReport> {
    let batch = generate(
        config.message_count,
        config.max_message_length,
        &mut rand::thread_rng(),
    );
    run_with(config, batch).await
}

/// Same as [`run_batch`] with a caller-provided random source.
pub async fn run_batch_with<R: Rng + ?Sized>(config: &Config, rng: &mut R) -> Result<DriveReport> {
    let batch = generate(config.message_count, config.max_message_length, rng);
    run_with(config, batch).await
}

async fn run_with(config: &Config, batch: Vec<Message>) -> Result<DriveReport> {
    let mut client = client::connect(config).await?;
    info!(count = batch.len(), peer = %client.peer(), "Generated batch");

    let send = match client.send_batch(batch).await {
        Ok(send) => send,
        Err(e) => {
            client.abort();
            return Err(e);
        }
    };

    let receive = client.finish(config.completion_timeout).await?;
    let report = DriveReport::new(send, &receive);
    log_report(&report);
    Ok(report)
}

/// Start a server, run one batch against it, then stop the server.
pub async fn run_demo(config: &Config) -> Result<DriveReport> {
    let server = Server::bind(config.clone()).await?;
    let addr = server.local_addr()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    info!("Starting demo client");
    let client_config = Config {
        host: match addr.ip() {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{ip}]"),
        },
        port: addr.port(),
        ..config.clone()
    };
    let result = run_batch(&client_config).await;
    info!("Demo client finished");

    let _ = shutdown_tx.send(true);
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Server stopped with error"),
        Err(e) => warn!(error = %e, "Server task failed"),
    }

    result
}

fn log_report(report: &DriveReport) {
    if report.is_complete() {
        info!(
            sent = report.sent,
            received = report.received,
            bytes = report.bytes_received,
            "All echoes received and valid"
        );
    } else {
        warn!(
            sent = report.sent,
            received = report.received,
            valid = report.valid,
            invalid = report.invalid,
            intact = report.intact,
            reassembly_errors = report.reassembly_errors,
            "Batch finished with discrepancies"
        );
    }
}
