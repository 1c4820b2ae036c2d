//! Per-bin export of a final partition
//!
//! Bins are handled strictly in order. For each one the existing artifact is
//! checked first; a valid artifact is skipped, a missing one is downloaded
//! and then checked again. A transport failure ends the run with a report
//! rather than an error, so the caller can tell "the server went away" apart
//! from "the data on disk is wrong".

use crate::downloader::rate_limit::Throttle;
use crate::downloader::DownloadError;
use crate::fetcher::EventDownloader;
use crate::metrics::{record_artifact_skipped, ArtifactMetrics};
use crate::output::{ArtifactStatus, BinFileStore, OutputError};
use crate::shutdown::{self, SharedShutdown};
use crate::{Bin, OutputFormat};
use indicatif::{HumanBytes, ProgressBar};
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Instrument};

/// What happened to one bin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinOutcome {
    /// Artifact already valid, nothing requested
    Skipped,
    /// Artifact downloaded and validated, with its size in bytes
    Downloaded(u64),
    /// Transfer failed; the run stopped here
    Failed(String),
}

/// Outcome of one bin of the partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinReport {
    /// Exported bin
    pub bin: Bin,
    /// What happened to it
    pub outcome: BinOutcome,
}

/// Run-wide totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportTotals {
    /// Bytes written into new artifacts
    pub bytes: u64,
    /// Bins skipped because their artifact already validated
    pub skipped: usize,
    /// Bins downloaded during this run
    pub downloaded: usize,
    /// Wall time of the run
    pub elapsed: Duration,
}

/// Result of [`ExportExecutor::run_export`]
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    /// One entry per processed bin, in partition order
    pub outcomes: Vec<BinReport>,
    /// Run-wide totals
    pub totals: ExportTotals,
}

impl ExportReport {
    /// The bin whose transfer failed, if any
    pub fn failure(&self) -> Option<&BinReport> {
        self.outcomes
            .iter()
            .find(|r| matches!(r.outcome, BinOutcome::Failed(_)))
    }

    /// Whether every bin of a partition of `expected` bins has a valid artifact
    pub fn is_complete(&self, expected: usize) -> bool {
        self.failure().is_none() && self.outcomes.len() == expected
    }
}

/// Downloads the artifacts of a partition one bin at a time
pub struct ExportExecutor<'a, D: ?Sized> {
    downloader: &'a D,
    throttle: Throttle,
    replace_invalid: bool,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressBar>,
}

impl<'a, D> ExportExecutor<'a, D>
where
    D: EventDownloader + ?Sized,
{
    /// Executor streaming from `downloader`
    pub fn new(downloader: &'a D) -> Self {
        Self {
            downloader,
            throttle: Throttle::disabled(),
            replace_invalid: false,
            shutdown: shutdown::get_global_shutdown(),
            progress: None,
        }
    }

    /// Pause `delay` before every download after the first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.throttle = Throttle::new(delay);
        self
    }

    /// Delete and re-download pre-existing invalid artifacts instead of aborting
    pub fn with_replace_invalid(mut self, replace_invalid: bool) -> Self {
        self.replace_invalid = replace_invalid;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Advance `progress` by one per bin
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Export every bin of `partition` into `store`
    ///
    /// # Errors
    /// - [`DownloadError::ArtifactInconsistency`] for an artifact that is
    ///   invalid after download, or was invalid beforehand without
    ///   `replace_invalid`
    /// - [`DownloadError::ArtifactCollision`] when an artifact appears
    ///   between validation and creation
    /// - [`DownloadError::Interrupted`] when shutdown is requested
    ///
    /// Transport failures are not errors: they end the run with a
    /// [`BinOutcome::Failed`] entry.
    pub async fn run_export(
        &self,
        partition: &[Bin],
        store: &BinFileStore,
        format: OutputFormat,
    ) -> Result<ExportReport, DownloadError> {
        let started = Instant::now();
        store.ensure_dir()?;

        info!(
            bins = partition.len(),
            format = %format,
            directory = %store.root().display(),
            "Starting export"
        );

        let mut throttle = self.throttle.clone();
        let mut report = ExportReport::default();
        let total = partition.len();

        for (index, bin) in partition.iter().enumerate() {
            if self.shutdown_requested() {
                return Err(self.interrupted(index, total));
            }

            let span = tracing::info_span!(
                "artifact",
                start = bin.start,
                end = bin.end,
                count = bin.count
            );
            let outcome = self
                .export_bin(bin, store, format, &mut throttle)
                .instrument(span)
                .await?;
            let Some(outcome) = outcome else {
                return Err(self.interrupted(index, total));
            };

            match &outcome {
                BinOutcome::Skipped => report.totals.skipped += 1,
                BinOutcome::Downloaded(bytes) => {
                    report.totals.downloaded += 1;
                    report.totals.bytes += bytes;
                }
                BinOutcome::Failed(_) => {}
            }
            let failed = matches!(outcome, BinOutcome::Failed(_));
            report.outcomes.push(BinReport { bin: *bin, outcome });

            if let Some(pb) = &self.progress {
                pb.inc(1);
                pb.set_message(format!(
                    "{} written, {} already present",
                    HumanBytes(report.totals.bytes),
                    report.totals.skipped
                ));
            }
            if failed {
                break;
            }
        }

        report.totals.elapsed = started.elapsed();
        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }

        match report.failure() {
            Some(failed) => error!(
                start = failed.bin.start,
                downloaded = report.totals.downloaded,
                skipped = report.totals.skipped,
                "Export stopped after a transfer failure"
            ),
            None => info!(
                downloaded = report.totals.downloaded,
                bytes = report.totals.bytes,
                skipped = report.totals.skipped,
                elapsed_ms = report.totals.elapsed.as_millis(),
                "Complete export"
            ),
        }
        Ok(report)
    }

    fn interrupted(&self, completed: usize, total: usize) -> DownloadError {
        if let Some(pb) = &self.progress {
            pb.abandon();
        }
        info!(completed = completed, total = total, "Shutdown requested - stopping before next bin");
        DownloadError::Interrupted { completed, total }
    }

    /// Returns `None` when shutdown interrupted the pause before a download
    async fn export_bin(
        &self,
        bin: &Bin,
        store: &BinFileStore,
        format: OutputFormat,
        throttle: &mut Throttle,
    ) -> Result<Option<BinOutcome>, DownloadError> {
        match store.validate(bin, format) {
            ArtifactStatus::Valid => {
                info!("Already been retrieved, skipping.");
                record_artifact_skipped();
                return Ok(Some(BinOutcome::Skipped));
            }
            ArtifactStatus::Invalid(reason) if !self.replace_invalid => {
                return Err(DownloadError::ArtifactInconsistency {
                    path: store.artifact_path(bin),
                    reason,
                });
            }
            ArtifactStatus::Invalid(reason) => {
                warn!(reason = %reason, "Replacing invalid artifact");
                store.remove(bin)?;
            }
            ArtifactStatus::Missing => {}
        }

        if !throttle.wait(self.shutdown.as_ref()).await {
            return Ok(None);
        }

        let metrics = ArtifactMetrics::start(bin.start);
        let bytes = match store.download(bin, format, self.downloader).await {
            Ok(bytes) => bytes,
            Err(OutputError::Transfer(e)) => {
                warn!(error = %e, "Transfer failed");
                return Ok(Some(BinOutcome::Failed(e.to_string())));
            }
            Err(e) => return Err(e.into()),
        };
        metrics.record_success(bytes);

        match store.validate(bin, format) {
            ArtifactStatus::Valid => {
                info!(bytes = bytes, "Wrote {}", HumanBytes(bytes));
                Ok(Some(BinOutcome::Downloaded(bytes)))
            }
            ArtifactStatus::Invalid(reason) => Err(DownloadError::ArtifactInconsistency {
                path: store.artifact_path(bin),
                reason: format!("Wrote inconsistent output file: {reason}"),
            }),
            ArtifactStatus::Missing => Err(DownloadError::ArtifactInconsistency {
                path: store.artifact_path(bin),
                reason: "Artifact vanished right after download".to_string(),
            }),
        }
    }
}
