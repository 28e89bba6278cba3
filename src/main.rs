use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};

use turnstile::admission::AdmissionController;
use turnstile::config::TurnstileConfig;
use turnstile::http::HttpServer;

/// Admission control gate for HTTP services.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Turnstile Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = match args.config.as_deref() {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    // Validate rules and build the admission controller
    let rules = config.admission.rule_set()?;
    let controller = Arc::new(AdmissionController::new(rules));
    info!(rules = controller.rules().len(), "Admission controller initialized");

    // Bound counter memory with a periodic eviction sweep
    let sweeper = controller.run_sweeper(config.admission.sweep_interval());

    // Run the server with graceful shutdown on Ctrl+C or SIGTERM
    let server = HttpServer::new(config.server.listen_addr, Arc::clone(&controller));
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.abort();
    info!("Turnstile Admission Control Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
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
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
