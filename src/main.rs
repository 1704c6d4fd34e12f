//! tcp-sluice: A TCP echo server fed by a credit-based accept bridge.
//!
//! # Usage
//!
//! ```bash
//! tcp-sluice --port 7070 --backlog 128 --log-level info
//! ```
//!
//! Environment variables can also be used:
//! - `SLUICE_PORT`: Port to listen on
//! - `SLUICE_BACKLOG`: Kernel accept queue length
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use tcp_sluice::config::Config;
use tcp_sluice::observability::metrics::init_metrics_with_endpoint;
use tcp_sluice::observability::tracing::init_tracing;
use tcp_sluice::server::run_server;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
   _                    _       _
  | |_ ___ _ __    ___ | |_   _(_) ___ ___
  | __/ __| '_ \  / __|| | | | | |/ __/ _ \
  | || (__| |_) | \__ \| | |_| | | (_|  __/
   \__\___| .__/  |___/|_|\__,_|_|\___\___|
          |_|

  tcp-sluice v{} - credit-based TCP accept bridge

  Configuration:
    Address:    {}
    Backlog:    {}
    Log Level:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.listen_addr(),
        config.backlog,
        config.log_level
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize tracing/logging
    init_tracing(&config.log_level, config.log_format);

    // Initialize metrics (with optional OTLP export)
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    print_banner(&config);

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn signal handler task
    tokio::spawn(async move {
        // Wait for SIGTERM or SIGINT (Ctrl+C)
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("failed to listen for ctrl+c");
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        let _ = shutdown_tx.send(true);
    });

    run_server(config, shutdown_rx).await?;

    tracing::info!("tcp-sluice shutdown complete");
    Ok(())
}
