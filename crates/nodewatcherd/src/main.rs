//! Node-health probe daemon
//!
//! Main entry point for nodewatcherd. Crawls the node every report
//! interval and delivers the report to the monitoring server.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured logging
//! - AU-12: Audit Record Generation - Log daemon lifecycle
//! - SI-4: System Monitoring - Periodic report cycle

use clap::Parser;
use nodewatcherd::{
    Cli, Config, DeliveryPipeline, HttpSender, NodeGatherer, NodewatcherError, Result,
    RetryPolicy,
};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> std::result::Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // NIST: AU-3, AU-12 - Audit logging setup
    init_logging(cli.debug)?;

    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "nodewatcherd: Invalid configuration");
            return Ok(ExitCode::FAILURE);
        }
    };

    info!(
        hostname = %config.identity.hostname,
        endpoint = %config.endpoint,
        dry = config.dry,
        "nodewatcherd: Starting Nodewatcher"
    );

    match run_daemon(config).await {
        Ok(()) => {
            info!("nodewatcherd: Daemon exiting normally");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "nodewatcherd: Daemon exiting with error");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Initialize structured logging; `RUST_LOG` overrides the level
fn init_logging(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| NodewatcherError::Config(format!("Failed to set logger: {}", e)))?;

    Ok(())
}

/// Run the report loop until a fatal gather error or a shutdown signal
async fn run_daemon(config: Config) -> Result<()> {
    let pipeline = DeliveryPipeline::new(
        NodeGatherer::from_config(&config),
        HttpSender::from_config(&config)?,
        RetryPolicy::default(),
        config.report_interval,
    );

    tokio::select! {
        result = pipeline.run() => result,
        () = shutdown_signal() => {
            info!("nodewatcherd: Received shutdown signal");
            Ok(())
        }
    }
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "nodewatcherd: Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "nodewatcherd: Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
