//! Partition planning
//!
//! A plan is computed in four steps, each ending with the partition
//! invariants checked explicitly:
//!
//! 1. one aggregate query over the whole range gives a coarse partition
//! 2. [`split`] refines it until every bin holds at most `maximum` events
//! 3. [`merge`] coalesces contiguous neighbours back together
//! 4. [`split`] runs once more with a fetch that always fails, so any bin
//!    still above the maximum surfaces as a consistency error

use crate::binfit::{
    contiguous, merge, overlapping, patch_boundaries, sort_by_start, split, total_count,
};
use crate::fetcher::AggregateCounter;
use crate::metrics::record_aggregate_query;
use crate::output::BinFileStore;
use crate::{Bin, PlanError, PlanResult};
use futures_util::TryStreamExt;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Memo of every aggregate query issued during a plan
///
/// The same range should never be asked twice. A repeat points at a server
/// that keeps answering with the same buckets; the planner refuses to issue
/// it and reports the bin as non-convergent.
#[derive(Debug, Default)]
pub struct QueryLedger {
    issued: Mutex<HashSet<(i64, i64)>>,
    total: AtomicU64,
}

impl QueryLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a query; returns `false` when the range was already asked
    pub fn record(&self, start: i64, end: i64) -> bool {
        self.total.fetch_add(1, Ordering::Relaxed);
        let first = self
            .issued
            .lock()
            .map(|mut issued| issued.insert((start, end)))
            .unwrap_or(true);
        if !first {
            warn!(start = start, end = end, "Aggregate query issued more than once");
        }
        first
    }

    /// Whether `[start, end]` has been queried
    pub fn was_issued(&self, start: i64, end: i64) -> bool {
        self.issued
            .lock()
            .map(|issued| issued.contains(&(start, end)))
            .unwrap_or(false)
    }

    /// Queries recorded, repeats included
    pub fn total_issued(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Distinct ranges recorded
    pub fn distinct(&self) -> usize {
        self.issued.lock().map(|issued| issued.len()).unwrap_or(0)
    }
}

/// Summary of a finished plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanMetrics {
    /// Aggregate queries issued while splitting, the coarse query excluded
    pub total_subqueries_issued: u64,
    /// Bins after splitting, before merging
    pub split_bins: usize,
    /// Bins in the final partition
    pub total_bins: usize,
    /// Events in the final partition
    pub total_events: u64,
    /// Wall time spent planning
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

/// Computes the final partition of a range
pub struct FetchPlanner<'a, C: ?Sized> {
    counter: &'a C,
    ledger: QueryLedger,
}

impl<'a, C> FetchPlanner<'a, C>
where
    C: AggregateCounter + ?Sized,
{
    /// Planner querying `counter`
    pub fn new(counter: &'a C) -> Self {
        Self {
            counter,
            ledger: QueryLedger::new(),
        }
    }

    /// Queries issued so far
    pub fn ledger(&self) -> &QueryLedger {
        &self.ledger
    }

    /// Whether `[start, end]` has been queried by this planner
    pub fn was_issued(&self, start: i64, end: i64) -> bool {
        self.ledger.was_issued(start, end)
    }

    /// Re-query an oversized bin for the splitter
    async fn fetch_subset(&self, bin: Bin, maximum: u64) -> PlanResult<Vec<Bin>> {
        if self.ledger.was_issued(bin.start, bin.end) {
            warn!(bin = %bin, "Range already queried; the server will not subdivide it");
            return Err(PlanError::unsplittable(bin, maximum));
        }
        self.fetch_patched(bin.start, bin.end).await
    }

    /// Ask the server about exactly `[start, end]`, patched and sorted
    async fn fetch_patched(&self, start: i64, end: i64) -> PlanResult<Vec<Bin>> {
        self.ledger.record(start, end);
        record_aggregate_query();

        let bins = self.counter.query(start, end).await?;
        let bins = sort_by_start(patch_boundaries(start, end, bins).collect());
        debug!(
            start = start,
            end = end,
            bins = bins.len(),
            events = total_count(&bins),
            "Aggregate query answered"
        );
        Ok(bins)
    }

    /// Partition `[start, end]` into bins of at most `maximum` events
    ///
    /// # Errors
    /// - [`PlanError::InvalidRequest`] for an inverted range or a zero maximum
    /// - [`PlanError::NonConvergence`] when the server will not subdivide a
    ///   bin, including when splitting leads back to a range already queried
    /// - [`PlanError::Consistency`] when counts are not conserved, a merged
    ///   bin exceeds the maximum or the final partition overlaps
    /// - [`PlanError::EmptyResult`] when the final partition has no bins
    /// - [`PlanError::Fetcher`] on transport failures
    pub async fn plan(&self, start: i64, end: i64, maximum: u64) -> PlanResult<(Vec<Bin>, PlanMetrics)> {
        let span = tracing::info_span!("plan", start = start, end = end, maximum = maximum);
        self.plan_inner(start, end, maximum).instrument(span).await
    }

    async fn plan_inner(&self, start: i64, end: i64, maximum: u64) -> PlanResult<(Vec<Bin>, PlanMetrics)> {
        if end < start {
            return Err(PlanError::InvalidRequest(format!(
                "end ({end}) must not precede start ({start})"
            )));
        }
        if maximum == 0 {
            return Err(PlanError::InvalidRequest(
                "maximum must be at least 1".to_string(),
            ));
        }

        let started = Instant::now();
        let coarse = self.fetch_patched(start, end).await?;
        info!(
            bins = coarse.len(),
            events = total_count(&coarse),
            "Coarse partition retrieved"
        );

        let fine: Vec<Bin> = split(coarse, maximum, |bin: Bin| self.fetch_subset(bin, maximum))
        .try_collect()
        .await?;
        let subqueries = self.ledger.total_issued().saturating_sub(1);
        info!(
            bins = fine.len(),
            events = total_count(&fine),
            requests = subqueries,
            "Estimation complete"
        );
        if overlapping(&fine) {
            return Err(PlanError::Consistency(
                "split produced overlapping bins".to_string(),
            ));
        }

        let merged: Vec<Bin> = merge(fine.iter().copied(), maximum).collect();
        info!(
            bins = merged.len(),
            events = total_count(&merged),
            "Repacked estimation"
        );

        let verified: Vec<Bin> = split(merged, maximum, |bin: Bin| async move {
            Err::<Vec<Bin>, _>(PlanError::Consistency(format!(
                "unsplit bin {bin} still exceeds maximum {maximum}"
            )))
        })
        .try_collect()
        .await?;

        if overlapping(&verified) {
            return Err(PlanError::Consistency(
                "final partition contains overlapping bins".to_string(),
            ));
        }
        if total_count(&verified) != total_count(&fine) {
            return Err(PlanError::Consistency(format!(
                "merging changed the event total from {} to {}",
                total_count(&fine),
                total_count(&verified)
            )));
        }
        if !contiguous(&verified) {
            warn!("Final partition has gaps between bins; the server's buckets do not tile the range");
        }
        if verified.is_empty() {
            return Err(PlanError::EmptyResult);
        }

        let metrics = PlanMetrics {
            total_subqueries_issued: subqueries,
            split_bins: fine.len(),
            total_bins: verified.len(),
            total_events: total_count(&verified),
            elapsed: started.elapsed(),
        };
        info!(
            total_bins = metrics.total_bins,
            total_events = metrics.total_events,
            requests = metrics.total_subqueries_issued,
            elapsed_ms = metrics.elapsed.as_millis(),
            "Plan complete"
        );
        Ok((verified, metrics))
    }

    /// Reject artifacts in the store that belong to no bin of `partition`
    ///
    /// # Errors
    /// [`PlanError::ForeignFiles`] listing the offending names.
    pub fn check_foreign_files(&self, partition: &[Bin], store: &BinFileStore) -> PlanResult<()> {
        let expected: HashSet<String> = partition.iter().map(BinFileStore::artifact_name).collect();
        let foreign: Vec<String> = store
            .list_artifacts()?
            .into_iter()
            .filter(|name| !expected.contains(name))
            .collect();

        if foreign.is_empty() {
            return Ok(());
        }
        Err(PlanError::ForeignFiles {
            directory: store.root().to_path_buf(),
            files: foreign,
        })
    }
}
