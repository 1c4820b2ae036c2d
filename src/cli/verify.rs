//! Verify command: check an output directory against a fresh plan

use crate::downloader::FetchPlanner;
use crate::output::{ArtifactStatus, BinFileStore};
use crate::shutdown::SharedShutdown;
use crate::{Bin, OutputFormat, PlanError};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use super::args::{plan_range, RangeArgs, ServerArgs};
use super::CliError;

/// Arguments for the verify command
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Server connection
    #[command(flatten)]
    pub server: ServerArgs,

    /// Time range and bin size the directory was exported with
    #[command(flatten)]
    pub range: RangeArgs,

    /// Directory holding the exported files
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Format the files were exported in: JSON or RAW
    #[arg(long, default_value = "JSON")]
    pub format: OutputFormat,
}

/// Per-bin verification counts
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyCounts {
    /// Artifacts that validate
    pub valid: usize,
    /// Artifacts present but inconsistent
    pub invalid: usize,
    /// Artifacts not present
    pub missing: usize,
}

/// Validate the artifact of every bin, printing one line per bin
pub fn verify_partition(partition: &[Bin], store: &BinFileStore, format: OutputFormat, print: bool) -> VerifyCounts {
    let mut counts = VerifyCounts::default();
    for bin in partition {
        let status = store.validate(bin, format);
        match &status {
            ArtifactStatus::Valid => counts.valid += 1,
            ArtifactStatus::Invalid(_) => counts.invalid += 1,
            ArtifactStatus::Missing => counts.missing += 1,
        }
        if print {
            println!("{}  {}", BinFileStore::artifact_name(bin), status);
        }
    }
    counts
}

impl VerifyArgs {
    /// Plan the range and validate each expected artifact without downloading
    pub async fn execute(&self, quiet: bool, shutdown: SharedShutdown) -> Result<(), CliError> {
        let Some(client) = self.server.connect(&shutdown).await? else {
            return Ok(());
        };
        let store = BinFileStore::new(&self.output);
        let planner = FetchPlanner::new(&client);
        let (partition, _) = plan_range(&planner, &self.range, &shutdown).await?;

        match planner.check_foreign_files(&partition, &store) {
            Ok(()) => {}
            Err(PlanError::ForeignFiles { files, .. }) => {
                warn!(files = %files.join(" "), "Files not part of this plan");
            }
            Err(e) => return Err(e.into()),
        }

        let counts = verify_partition(&partition, &store, self.format, !quiet);
        info!(
            valid = counts.valid,
            invalid = counts.invalid,
            missing = counts.missing,
            "Verification complete"
        );

        if counts.invalid > 0 || counts.missing > 0 {
            return Err(CliError::VerifyFailed {
                invalid: counts.invalid,
                missing: counts.missing,
            });
        }
        Ok(())
    }
}
