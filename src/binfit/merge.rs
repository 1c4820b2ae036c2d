//! Greedy coalescing of neighbouring bins

use crate::Bin;
use tracing::debug;

/// Lazy iterator returned by [`merge`]
#[derive(Debug, Clone)]
pub struct Merge<I> {
    bins: I,
    maximum: u64,
    acc: Option<Bin>,
}

impl<I> Iterator for Merge<I>
where
    I: Iterator<Item = Bin>,
{
    type Item = Bin;

    fn next(&mut self) -> Option<Bin> {
        let mut acc = self.acc.take()?;
        for next in self.bins.by_ref() {
            if acc.touches(&next) && acc.count + next.count <= self.maximum {
                let combined = Bin::new(acc.start, next.end, acc.count + next.count);
                debug!("Combined {} and {} into {}", acc, next, combined);
                acc = combined;
            } else {
                self.acc = Some(next);
                return Some(acc);
            }
        }
        Some(acc)
    }
}

/// Coalesce contiguous neighbours left to right without exceeding `maximum`
///
/// The accumulator absorbs the next bin whenever the two touch and the sum of
/// their counts stays within the maximum; otherwise the accumulator is emitted
/// and restarts from the next bin. The result is not a globally optimal
/// packing, and non-contiguous neighbours are never joined.
pub fn merge<I>(partition: I, maximum: u64) -> Merge<I::IntoIter>
where
    I: IntoIterator<Item = Bin>,
{
    let mut bins = partition.into_iter();
    let acc = bins.next();
    Merge { bins, maximum, acc }
}
