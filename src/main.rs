use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use admission::config::{AppConfig, LogFormat, LoggingConfig};
use admission::http::HttpServer;
use admission::ratelimit::{AdmissionController, Sweeper};

/// Sliding-window admission control service.
#[derive(Debug, Parser)]
#[command(name = "admissiond", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    init_tracing(&config.logging);

    info!("Starting admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        sweep_interval_secs = config.admission.sweep_interval_secs,
        retention_secs = config.admission.retention_secs,
        "Configuration loaded"
    );

    let controller = Arc::new(
        AdmissionController::builder()
            .policies(config.admission.policy_table()?)
            .retention(config.admission.retention())
            .build(),
    );
    info!("Admission controller initialized");

    let sweeper = Sweeper::spawn(controller.clone(), config.admission.sweep_interval());

    let server = HttpServer::new(config.server.listen_addr, controller);
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.shutdown().await;

    info!("Admission service stopped");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
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
