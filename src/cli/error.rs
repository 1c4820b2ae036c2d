//! CLI error types and exit statuses

use crate::convert::ConvertError;
use crate::downloader::config::{
    EXIT_ARTIFACT_COLLISION, EXIT_ARTIFACT_INCONSISTENT, EXIT_INTERRUPTED, EXIT_PARTITION_FAILURE,
};
use crate::downloader::DownloadError;
use crate::fetcher::FetcherError;
use crate::output::OutputError;
use crate::PlanError;

/// Generic failure: transport, configuration, I/O
pub const EXIT_FAILURE: i32 = 1;

/// Usage-level refusal
pub const EXIT_USAGE: i32 = 2;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Planning error
    #[error(transparent)]
    PlanError(#[from] PlanError),

    /// Download error
    #[error(transparent)]
    DownloadError(#[from] DownloadError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Conversion error
    #[error("convert error: {0}")]
    ConvertError(#[from] ConvertError),

    /// A bin could not be transferred; the export stopped there
    #[error("export stopped at bin starting {start}: {reason}")]
    TransferFailed {
        /// Start of the failed bin
        start: i64,
        /// Transport diagnostic
        reason: String,
    },

    /// Some artifacts are not valid
    #[error("{invalid} invalid and {missing} missing artifact(s)")]
    VerifyFailed {
        /// Artifacts present but inconsistent with their bin
        invalid: usize,
        /// Artifacts not present
        missing: usize,
    },

    /// Ctrl+C before any artifact was touched
    #[error("interrupted")]
    Interrupted,

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

fn plan_exit_code(err: &PlanError) -> i32 {
    match err {
        PlanError::EmptyResult | PlanError::ForeignFiles { .. } | PlanError::InvalidRequest(_) => {
            EXIT_USAGE
        }
        PlanError::NonConvergence { .. } | PlanError::Consistency(_) => EXIT_PARTITION_FAILURE,
        PlanError::Fetcher(_) | PlanError::Output(_) => EXIT_FAILURE,
    }
}

impl CliError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::PlanError(e) => plan_exit_code(e),
            CliError::DownloadError(e) => match e {
                DownloadError::Plan(e) => plan_exit_code(e),
                DownloadError::ArtifactInconsistency { .. } => EXIT_ARTIFACT_INCONSISTENT,
                DownloadError::ArtifactCollision { .. } => EXIT_ARTIFACT_COLLISION,
                DownloadError::Interrupted { .. } => EXIT_INTERRUPTED,
                DownloadError::FetcherError(_) | DownloadError::OutputError(_) => EXIT_FAILURE,
            },
            CliError::ConvertError(ConvertError::InvalidLimits(_)) => EXIT_USAGE,
            CliError::VerifyFailed { invalid, .. } if *invalid > 0 => EXIT_ARTIFACT_INCONSISTENT,
            CliError::Interrupted => EXIT_INTERRUPTED,
            CliError::InvalidArgument(_) => EXIT_USAGE,
            CliError::FetcherError(_)
            | CliError::OutputError(_)
            | CliError::ConvertError(_)
            | CliError::TransferFailed { .. }
            | CliError::VerifyFailed { .. }
            | CliError::ConfigurationError(_) => EXIT_FAILURE,
        }
    }
}
