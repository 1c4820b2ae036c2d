//! Main entry point for the loginsight-export CLI

use clap::Parser;
use loginsight_export::cli::{Cli, Commands};
use loginsight_export::metrics::init_metrics;
use loginsight_export::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing(default_filter: &str) {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_filter());

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = init_metrics(addr).await {
            error!("Metrics disabled: {e:#}");
        }
    }

    // Install global shutdown coordinator and Ctrl+C handler
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - stopping before the next bin...");
                shutdown.request_shutdown();
            }
        }
    });

    let result = match cli.command {
        Commands::Export(ref args) => args.execute(&cli, shutdown.clone()).await,
        Commands::Plan(ref args) => args.execute(shutdown.clone()).await,
        Commands::Verify(ref args) => args.execute(cli.quiet, shutdown.clone()).await,
        Commands::Convert(ref args) => args.execute(cli.quiet),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }
}
