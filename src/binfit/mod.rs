//! Bin algebra over time-ordered partitions
//!
//! A query answer is a sequence of [`Bin`]s. This module provides the pure
//! predicates and transforms the planner relies on at every stage boundary:
//!
//! - [`sort_by_start`] - stable ordering by start time
//! - [`overlapping`] - positive-measure intersection between neighbours
//! - [`contiguous`] - neighbours separated by exactly one millisecond
//! - [`patch_boundaries`] - clamp superset bins to the requested range
//!
//! plus the two partition transforms:
//!
//! - [`split`] - recursive refinement until every bin fits under the maximum
//! - [`merge`] - greedy left-to-right coalescing of contiguous neighbours

use crate::fetcher::FetcherError;
use crate::output::OutputError;
use crate::Bin;
use std::path::PathBuf;
use tracing::debug;

pub mod merge;
pub mod split;

pub use merge::{merge, Merge};
pub use split::split;

/// Partition planning errors
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Server cannot subdivide a bin that still exceeds the maximum
    #[error("partition did not converge at bin {bin}: {message}")]
    NonConvergence {
        /// Offending bin
        bin: Bin,
        /// Configured maximum
        maximum: u64,
        /// Operator guidance
        message: String,
    },

    /// Descendant counts disagree with their parent, or a final bin exceeds the maximum
    #[error("partition consistency error: {0}")]
    Consistency(String),

    /// The final plan contains no bins
    #[error("there appears to be no data in this query and time range")]
    EmptyResult,

    /// Range or maximum rejected before any query
    #[error("invalid plan request: {0}")]
    InvalidRequest(String),

    /// Pre-existing artifacts that belong to no bin of the plan
    #[error(
        "extra files in the output directory {} are not part of the desired output set; delete them or use a different directory: {}",
        directory.display(),
        files.join(" ")
    )]
    ForeignFiles {
        /// Scanned output directory
        directory: PathBuf,
        /// Offending file names
        files: Vec<String>,
    },

    /// Aggregate query failed
    #[error("aggregate query failed: {0}")]
    Fetcher(#[from] FetcherError),

    /// Output directory could not be inspected
    #[error("output error: {0}")]
    Output(#[from] OutputError),
}

impl PlanError {
    /// A zero-width bin still holds more events than the maximum
    pub fn zero_width(bin: Bin, maximum: u64) -> Self {
        Self::NonConvergence {
            bin,
            maximum,
            message: format!(
                "this bin is 0ms long, so the server won't subdivide it any further, but there are more than {maximum} events in it; use a larger maximum"
            ),
        }
    }

    /// [`zero_width`](Self::zero_width) or [`indivisible`](Self::indivisible),
    /// whichever describes `bin`
    pub fn unsplittable(bin: Bin, maximum: u64) -> Self {
        if bin.start == bin.end {
            Self::zero_width(bin, maximum)
        } else {
            Self::indivisible(bin, maximum)
        }
    }

    /// The server answered a sub-range query with the very same bin
    pub fn indivisible(bin: Bin, maximum: u64) -> Self {
        Self::NonConvergence {
            bin,
            maximum,
            message: format!(
                "the server won't subdivide this bin any further, but there are more than {maximum} events in it; raise the maximum"
            ),
        }
    }
}

/// Result type for planning operations
pub type PlanResult<T> = Result<T, PlanError>;

/// Stable ascending order by start time
pub fn sort_by_start(mut bins: Vec<Bin>) -> Vec<Bin> {
    bins.sort_by_key(|b| b.start);
    bins
}

/// Whether any bin intersects its predecessor with positive measure
///
/// Bins must already be in start order. Touching bins (`end == next.start`)
/// and zero-width bins sitting on a neighbour's edge do not overlap.
pub fn overlapping(bins: &[Bin]) -> bool {
    bins.windows(2)
        .any(|pair| pair[0].start < pair[1].end && pair[1].start < pair[0].end)
}

/// Whether every consecutive pair is separated by exactly one millisecond
pub fn contiguous(bins: &[Bin]) -> bool {
    for pair in bins.windows(2) {
        if !pair[0].touches(&pair[1]) {
            debug!(
                "In the comparison of {} with {}, observe that {} + 1 != {}",
                pair[0], pair[1], pair[0].end, pair[1].start
            );
            return false;
        }
    }
    true
}

/// Clamp server bins to the requested range
///
/// A server may answer "how many events after noon yesterday?" with "12 events
/// yesterday": the count is scoped to the asked range but the reported span is
/// larger. Any bin with a requested boundary strictly inside it is trimmed to
/// that boundary. Counts are passed through untouched.
pub fn patch_boundaries<I>(
    requested_start: i64,
    requested_end: i64,
    bins: I,
) -> impl Iterator<Item = Bin>
where
    I: IntoIterator<Item = Bin>,
{
    bins.into_iter().map(move |b| {
        let start_inside = b.strictly_contains(requested_start);
        let end_inside = b.strictly_contains(requested_end);
        let patched = match (start_inside, end_inside) {
            (true, true) => Bin::new(requested_start, requested_end, b.count),
            (true, false) => Bin::new(requested_start, b.end, b.count),
            (false, true) => Bin::new(b.start, requested_end, b.count),
            (false, false) => return b,
        };
        debug!("Patched {} -> {}", b, patched);
        patched
    })
}

/// Sum of counts over a partition
pub fn total_count(bins: &[Bin]) -> u64 {
    bins.iter().map(|b| b.count).sum()
}
