//! Partition invariants over many generated event sets

use futures_util::TryStreamExt;
use loginsight_export::binfit::{
    contiguous, merge, overlapping, patch_boundaries, sort_by_start, split, total_count,
};
use loginsight_export::{Bin, PlanError, PlanResult};

/// Small deterministic generator so failures reproduce
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

/// Distinct event timestamps in `[0, width)`
fn events(rng: &mut Lcg, width: i64) -> Vec<i64> {
    let n = rng.below(400) + 1;
    let mut ts: Vec<i64> = (0..n).map(|_| rng.below(width as u64) as i64).collect();
    ts.sort_unstable();
    ts.dedup();
    ts
}

/// Chart of `[start, end]` in up to `buckets` equal slices
fn chart(events: &[i64], start: i64, end: i64, buckets: i64) -> Vec<Bin> {
    let width = end - start + 1;
    let buckets = width.min(buckets);
    (0..buckets)
        .map(|i| {
            let s = start + i * width / buckets;
            let e = start + (i + 1) * width / buckets - 1;
            let count = events.iter().filter(|&&t| s <= t && t <= e).count() as u64;
            Bin::new(s, e, count)
        })
        .collect()
}

#[tokio::test]
async fn test_split_and_merge_invariants() {
    let mut rng = Lcg(0x5eed);
    for round in 0..50 {
        let width = 1000 + rng.below(100_000) as i64;
        let events = events(&mut rng, width);
        let maximum = rng.below(60) + 1;
        let buckets = 2 + rng.below(10) as i64;

        let coarse = chart(&events, 0, width - 1, buckets);
        let fine: Vec<Bin> = split(coarse, maximum, |bin: Bin| {
            let sub = chart(&events, bin.start, bin.end, buckets);
            async move { Ok::<_, PlanError>(sub) }
        })
        .try_collect()
        .await
        .unwrap_or_else(|e| panic!("round {round}: {e}"));

        assert_eq!(total_count(&fine), events.len() as u64, "round {round}");
        assert!(!overlapping(&fine), "round {round}");
        assert!(contiguous(&fine), "round {round}");
        assert!(fine.iter().all(|b| b.count <= maximum), "round {round}");

        let merged: Vec<Bin> = merge(fine.iter().copied(), maximum).collect();
        assert_eq!(total_count(&merged), events.len() as u64, "round {round}");
        assert!(!overlapping(&merged), "round {round}");
        assert!(contiguous(&merged), "round {round}");
        assert!(merged.iter().all(|b| b.count <= maximum), "round {round}");
        assert!(merged.len() <= fine.len(), "round {round}");

        // A merged partition needs no further splitting
        let again: PlanResult<Vec<Bin>> = split(merged.clone(), maximum, |bin: Bin| async move {
            Err::<Vec<Bin>, _>(PlanError::Consistency(format!("{bin} over maximum")))
        })
        .try_collect()
        .await;
        assert_eq!(again.unwrap(), merged, "round {round}");
    }
}

#[tokio::test]
async fn test_identity_fetch_never_converges() {
    let mut rng = Lcg(7);
    for _ in 0..20 {
        let count = rng.below(1000) + 2;
        let bin = Bin::new(0, rng.below(10_000) as i64, count);
        let result: PlanResult<Vec<Bin>> = split(vec![bin], count - 1, |b: Bin| async move {
            Ok::<_, PlanError>(vec![b])
        })
        .try_collect()
        .await;
        assert!(matches!(result, Err(PlanError::NonConvergence { .. })));
    }
}

#[test]
fn test_patch_boundaries_idempotent() {
    let mut rng = Lcg(42);
    for _ in 0..200 {
        let start = rng.below(500) as i64;
        let end = start + rng.below(500) as i64;
        let bins: Vec<Bin> = (0..5)
            .map(|_| {
                let s = rng.below(1000) as i64;
                Bin::new(s, s + rng.below(300) as i64, rng.below(50))
            })
            .collect();

        let once: Vec<Bin> = patch_boundaries(start, end, bins.clone()).collect();
        let twice: Vec<Bin> = patch_boundaries(start, end, once.clone()).collect();
        assert_eq!(once, twice);
        assert_eq!(total_count(&once), total_count(&bins));
        assert!(once.iter().all(|b| !b.strictly_contains(start) && !b.strictly_contains(end)));
    }
}

#[test]
fn test_sort_by_start_orders_any_input() {
    let mut rng = Lcg(99);
    let bins: Vec<Bin> = (0..100)
        .map(|_| {
            let s = rng.below(10_000) as i64;
            Bin::new(s, s + 10, 1)
        })
        .collect();
    let sorted = sort_by_start(bins);
    assert!(sorted.windows(2).all(|w| w[0].start <= w[1].start));
}
