//! # Log Insight Export Library
//!
//! Exports large volumes of time-stamped events from a Log Insight server whose
//! query API caps the number of events returned per request.
//!
//! ## Features
//!
//! - **Adaptive Binning**: Recursively splits a time range using aggregate counts until
//!   every sub-range fits under the per-request maximum, then greedily re-merges neighbours
//! - **Lossless Coverage**: Partitions are checked for overlap and count conservation at
//!   every stage boundary
//! - **Idempotent Re-runs**: One artifact per bin, validated before and after download
//! - **Conservative Transport**: Strictly sequential requests with bounded retry and an
//!   optional fixed delay between downloads
//!
//! ## Quick Start
//!
//! ```no_run
//! use loginsight_export::downloader::{ExportExecutor, FetchPlanner};
//! use loginsight_export::fetcher::http::{LogInsightClient, ServerConfig};
//! use loginsight_export::output::BinFileStore;
//! use loginsight_export::OutputFormat;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::new("https://loginsight.example.com");
//! let client = LogInsightClient::new(config)?;
//!
//! // Plan bins of at most 2000 events over one day
//! let planner = FetchPlanner::new(&client);
//! let (partition, metrics) = planner.plan(1483228800000, 1483315199999, 2000).await?;
//! println!("{} bins, {} events", metrics.total_bins, metrics.total_events);
//!
//! // Download one artifact per bin
//! let store = BinFileStore::new("./export");
//! planner.check_foreign_files(&partition, &store)?;
//! let report = ExportExecutor::new(&client)
//!     .run_export(&partition, &store, OutputFormat::Json)
//!     .await?;
//! println!("{} bytes written", report.totals.bytes);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`binfit`] - Pure bin algebra plus the splitter and merger
//! - [`fetcher`] - Server collaborators: aggregate counts and event export streams
//! - [`downloader`] - Planning and per-bin export orchestration
//! - [`output`] - Per-bin artifact naming, validation and exclusive writes
//! - [`convert`] - Conversion of JSON artifacts into ingestion-API payloads
//! - [`cli`] - Command line front end

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Bin algebra, splitting and merging
pub mod binfit;

/// CLI command implementations
pub mod cli;

/// Conversion of exported JSON into ingestion payloads
pub mod convert;

/// Planning and export orchestration
pub mod downloader;

/// Server collaborators
pub mod fetcher;

/// Prometheus metrics
pub mod metrics;

/// Per-bin artifact storage
pub mod output;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use binfit::{PlanError, PlanResult};

/// A closed time interval and the number of events the server reports for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bin {
    /// Start time (Unix timestamp in milliseconds, inclusive)
    pub start: i64,
    /// End time (Unix timestamp in milliseconds, inclusive)
    pub end: i64,
    /// Number of events reported for exactly this interval
    pub count: u64,
}

impl Bin {
    /// Create a new bin
    pub const fn new(start: i64, end: i64, count: u64) -> Self {
        Self { start, end, count }
    }

    /// Validate bin integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.end < self.start {
            return Err(format!(
                "Bin end ({}) must not precede start ({})",
                self.end, self.start
            ));
        }
        Ok(())
    }

    /// Width of the interval in milliseconds
    pub fn span(&self) -> i64 {
        self.end - self.start
    }

    /// Whether `t` lies strictly inside the interval
    pub fn strictly_contains(&self, t: i64) -> bool {
        self.start < t && t < self.end
    }

    /// Whether `next` starts exactly one millisecond after this bin ends
    pub fn touches(&self, next: &Bin) -> bool {
        self.end + 1 == next.start
    }
}

impl From<(i64, i64, u64)> for Bin {
    fn from((start, end, count): (i64, i64, u64)) -> Self {
        Self::new(start, end, count)
    }
}

impl std::fmt::Display for Bin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..={}]x{}", self.start, self.end, self.count)
    }
}

/// Export format requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    /// Structured JSON document with a total count and a truncation flag
    #[default]
    #[serde(rename = "JSON")]
    Json,
    /// Raw line-oriented event text
    #[serde(rename = "RAW")]
    Raw,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutputFormat::Json => "JSON",
            OutputFormat::Raw => "RAW",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JSON" => Ok(OutputFormat::Json),
            "RAW" => Ok(OutputFormat::Raw),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
