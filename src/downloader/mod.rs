//! Planning and export orchestration
//!
//! The export workflow runs in two phases:
//!
//! 1. **Planning**: [`planner::FetchPlanner`] asks the server for a coarse
//!    partition, splits it until every bin fits, merges neighbours back
//!    together and verifies the result
//! 2. **Export**: [`executor::ExportExecutor`] walks the final partition in
//!    ascending order, skipping bins whose artifact already validates and
//!    downloading the rest
//!
//! Every network call is awaited before the next one starts. Nothing is
//! spawned; the only pacing knob is the fixed delay of
//! [`rate_limit::Throttle`].
//!
//! # Error Handling
//!
//! Planning returns [`crate::PlanError`]; the export phase returns
//! [`DownloadError`], which wraps it. A transport failure while downloading
//! one bin is not an error of the run: it is recorded as
//! [`executor::BinOutcome::Failed`] and ends the run with a report.

use crate::fetcher::FetcherError;
use crate::output::OutputError;
use crate::PlanError;
use std::path::PathBuf;

pub mod config;
pub mod executor;
pub mod planner;
pub mod rate_limit;

pub use executor::{BinOutcome, ExportExecutor, ExportReport, ExportTotals};
pub use planner::{FetchPlanner, PlanMetrics, QueryLedger};
pub use rate_limit::Throttle;

/// Export errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Planning failed
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// An artifact does not match its bin
    #[error("InconsistentFile {}: {reason} - Delete it and retry, or report a bug.", path.display())]
    ArtifactInconsistency {
        /// Offending artifact
        path: PathBuf,
        /// Validation diagnostic
        reason: String,
    },

    /// An artifact appeared between validation and creation
    #[error("Refusing to overwrite existing file {}. Delete it and retry, or report a bug.", path.display())]
    ArtifactCollision {
        /// Existing artifact
        path: PathBuf,
    },

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(String),

    /// Shutdown requested between bins
    #[error("interrupted after {completed} of {total} bins")]
    Interrupted {
        /// Bins handled before the interruption
        completed: usize,
        /// Bins in the partition
        total: usize,
    },
}

impl From<OutputError> for DownloadError {
    fn from(err: OutputError) -> Self {
        match err {
            OutputError::Collision { path } => DownloadError::ArtifactCollision { path },
            OutputError::Transfer(e) => DownloadError::FetcherError(e),
            other => DownloadError::OutputError(other.to_string()),
        }
    }
}
