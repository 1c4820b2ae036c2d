//! Plan command: print the final partition without downloading

use crate::downloader::{FetchPlanner, PlanMetrics};
use crate::shutdown::SharedShutdown;
use crate::Bin;
use chrono::{DateTime, SecondsFormat};
use clap::Parser;
use serde::Serialize;

use super::args::{plan_range, RangeArgs, ServerArgs};
use super::CliError;

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Server connection
    #[command(flatten)]
    pub server: ServerArgs,

    /// Time range and bin size
    #[command(flatten)]
    pub range: RangeArgs,

    /// Print the plan as JSON instead of a table
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    bins: &'a [Bin],
    metrics: &'a PlanMetrics,
}

impl PlanArgs {
    /// Plan the range and print the partition
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<(), CliError> {
        let Some(client) = self.server.connect(&shutdown).await? else {
            return Ok(());
        };
        let planner = FetchPlanner::new(&client);
        let (partition, metrics) = plan_range(&planner, &self.range, &shutdown).await?;

        if self.json {
            let output = PlanOutput {
                bins: &partition,
                metrics: &metrics,
            };
            let text = serde_json::to_string_pretty(&output)
                .map_err(|e| CliError::ConfigurationError(format!("Failed to render plan: {e}")))?;
            println!("{text}");
        } else {
            print!("{}", render_table(&partition, &metrics));
        }
        Ok(())
    }
}

fn format_millis(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Human-readable table of a partition
pub fn render_table(partition: &[Bin], metrics: &PlanMetrics) -> String {
    let mut out = format!("{:<26} {:<26} {:>8}\n", "START", "END", "EVENTS");
    for bin in partition {
        out.push_str(&format!(
            "{:<26} {:<26} {:>8}\n",
            format_millis(bin.start),
            format_millis(bin.end),
            bin.count
        ));
    }
    out.push_str(&format!(
        "{} events in {} bins ({} before merging), {} requests in {} ms\n",
        metrics.total_events,
        metrics.total_bins,
        metrics.split_bins,
        metrics.total_subqueries_issued,
        metrics.elapsed.as_millis()
    ));
    out
}
