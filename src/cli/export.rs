//! Export command implementation

use crate::downloader::executor::BinReport;
use crate::downloader::{BinOutcome, ExportExecutor, ExportReport, FetchPlanner};
use crate::output::{BinFileStore, OutputLock};
use crate::shutdown::SharedShutdown;
use crate::OutputFormat;
use clap::Parser;
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::args::{plan_range, RangeArgs, ServerArgs};
use super::{Cli, CliError};

/// Arguments for the export command
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Server connection
    #[command(flatten)]
    pub server: ServerArgs,

    /// Time range and bin size
    #[command(flatten)]
    pub range: RangeArgs,

    /// Write exported data to this directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Export format: JSON or RAW
    #[arg(long, default_value = "JSON")]
    pub format: OutputFormat,

    /// Be nice: delay this many seconds between bin downloads
    #[arg(long, default_value_t = 0)]
    pub nice: u64,

    /// Delete and re-download files that fail validation instead of stopping
    #[arg(long, default_value_t = false)]
    pub replace_invalid: bool,
}

impl ExportArgs {
    /// Plan the range and download every bin into the output directory
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let Some(client) = self.server.connect(&shutdown).await? else {
            return Ok(());
        };
        let store = BinFileStore::new(&self.output);

        let planner = FetchPlanner::new(&client);
        let (partition, metrics) = plan_range(&planner, &self.range, &shutdown).await?;
        planner.check_foreign_files(&partition, &store)?;
        // Nothing is created in the output directory until the plan is accepted
        let _lock = OutputLock::try_acquire(&self.output)?;
        info!(
            bins = metrics.total_bins,
            events = metrics.total_events,
            requests = metrics.total_subqueries_issued,
            "Plan ready"
        );

        let mut executor = ExportExecutor::new(&client)
            .with_delay(Duration::from_secs(self.nice))
            .with_replace_invalid(self.replace_invalid)
            .with_shutdown(shutdown);
        if cli.show_progress() {
            executor = executor.with_progress(create_progress_bar(partition.len() as u64));
        }

        let report = executor
            .run_export(&partition, &store, self.format)
            .await?;

        if let Some(BinReport {
            bin,
            outcome: BinOutcome::Failed(reason),
        }) = report.failure()
        {
            return Err(CliError::TransferFailed {
                start: bin.start,
                reason: reason.clone(),
            });
        }

        if !cli.quiet {
            println!("{}", summary(&report));
        }
        Ok(())
    }
}

/// One-line summary of a finished export
pub fn summary(report: &ExportReport) -> String {
    let totals = &report.totals;
    format!(
        "Complete export: {} bins downloaded {} in {} ({} already present)",
        totals.downloaded,
        HumanBytes(totals.bytes),
        HumanDuration(totals.elapsed),
        totals.skipped
    )
}

/// Create progress bar with style
pub(crate) fn create_progress_bar(bins: u64) -> ProgressBar {
    let pb = ProgressBar::new(bins);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message("Exporting");
    pb
}
