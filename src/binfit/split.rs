//! Recursive refinement of a partition until every bin fits under a maximum
//!
//! The recursion is driven by an explicit stack of frames so a server that
//! fragments a range one event at a time cannot exhaust the call stack. Each
//! frame remembers the oversized bin it expands and the sum of counts emitted
//! beneath it; when a frame drains, that sum must equal the parent's count.

use super::{PlanError, PlanResult};
use crate::Bin;
use futures_util::stream::{self, Stream};
use std::collections::VecDeque;
use std::future::Future;
use tracing::{debug, trace};

struct Frame {
    parent: Option<Bin>,
    remaining: VecDeque<Bin>,
    emitted: u64,
}

struct SplitState<F> {
    frames: Vec<Frame>,
    maximum: u64,
    fetch_subset: F,
}

/// Split `partition` so that no emitted bin holds more than `maximum` events
///
/// `fetch_subset` is called with an oversized bin and must return the
/// server's partition of exactly that range, patched and sorted. The
/// returned stream is lazy and single-pass: sub-queries are issued only as
/// the consumer pulls, strictly one at a time, in ascending start order.
///
/// # Errors
///
/// - [`PlanError::NonConvergence`] when the partition `fetch_subset` hands
///   back still contains the bin it was asked to subdivide
/// - [`PlanError::Consistency`] when the descendants of a bin do not add up
///   to the bin's own count
/// - any error returned by `fetch_subset`, unchanged
///
/// The first error ends the stream.
pub fn split<I, F, Fut>(
    partition: I,
    maximum: u64,
    fetch_subset: F,
) -> impl Stream<Item = PlanResult<Bin>>
where
    I: IntoIterator<Item = Bin>,
    F: FnMut(Bin) -> Fut,
    Fut: Future<Output = PlanResult<Vec<Bin>>>,
{
    let root = Frame {
        parent: None,
        remaining: partition.into_iter().collect(),
        emitted: 0,
    };
    let state = SplitState {
        frames: vec![root],
        maximum,
        fetch_subset,
    };

    stream::try_unfold(state, |mut state| async move {
        loop {
            let Some(frame) = state.frames.last_mut() else {
                return Ok(None);
            };

            match frame.remaining.pop_front() {
                None => {
                    let Some(done) = state.frames.pop() else {
                        return Ok(None);
                    };
                    if let Some(parent) = done.parent {
                        if done.emitted != parent.count {
                            return Err(PlanError::Consistency(format!(
                                "descendants of {} add up to {} events, not {}",
                                parent, done.emitted, parent.count
                            )));
                        }
                        trace!(bin = %parent, "Split fully expanded");
                        if let Some(outer) = state.frames.last_mut() {
                            outer.emitted += done.emitted;
                        }
                    }
                }
                Some(bin) if bin.count <= state.maximum => {
                    frame.emitted += bin.count;
                    return Ok(Some((bin, state)));
                }
                Some(bin) => {
                    debug!(
                        start = bin.start,
                        end = bin.end,
                        count = bin.count,
                        maximum = state.maximum,
                        "Splitting oversized bin"
                    );
                    let candidate = (state.fetch_subset)(bin).await?;

                    // A candidate still holding the bin would expand it again forever
                    if candidate.contains(&bin) {
                        return Err(PlanError::unsplittable(bin, state.maximum));
                    }

                    state.frames.push(Frame {
                        parent: Some(bin),
                        remaining: candidate.into(),
                        emitted: 0,
                    });
                }
            }
        }
    })
}
