//! CLI command implementations

pub mod args;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod export;
pub mod plan;
pub mod verify;

use clap::{ArgAction, Parser, Subcommand};
use std::net::SocketAddr;

pub use args::{RangeArgs, ServerArgs};
pub use convert::ConvertArgs;
pub use error::CliError;
pub use export::ExportArgs;
pub use plan::PlanArgs;
pub use verify::VerifyArgs;

/// Log Insight export CLI
#[derive(Parser, Debug)]
#[command(name = "loginsight-export")]
#[command(
    about = "Export events from a Log Insight server into local files, one file per time bin",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Replace the progress bar with debug logs; -vv for trace
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Silence the progress bar and summaries; only warnings and errors are logged
    #[arg(short, long, global = true, default_value_t = false, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9100)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Default tracing filter for the requested verbosity
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "loginsight_export=warn";
        }
        match self.verbose {
            0 => "loginsight_export=info",
            1 => "loginsight_export=debug",
            _ => "loginsight_export=trace",
        }
    }

    /// Whether to draw progress bars
    pub fn show_progress(&self) -> bool {
        !self.quiet && self.verbose == 0
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan bins over a time range and download one file per bin
    Export(ExportArgs),

    /// Plan bins over a time range and print them without downloading
    Plan(PlanArgs),

    /// Plan bins and check the files already in an output directory
    Verify(VerifyArgs),

    /// Convert exported JSON files into ingestion API payloads
    Convert(ConvertArgs),
}
