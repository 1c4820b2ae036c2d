//! End-to-end plan and export against an in-memory server

use async_trait::async_trait;
use bytes::Bytes;
use loginsight_export::binfit::contiguous;
use loginsight_export::downloader::{BinOutcome, DownloadError, ExportExecutor, FetchPlanner};
use loginsight_export::fetcher::{
    AggregateCounter, ByteStream, EventDownloader, FetcherError, FetcherResult,
};
use loginsight_export::output::{ArtifactStatus, BinFileStore};
use loginsight_export::shutdown::ShutdownCoordinator;
use loginsight_export::{Bin, OutputFormat, PlanError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Events at fixed timestamps; charts always split a range into four buckets
struct MemoryServer {
    events: Vec<i64>,
    exports: AtomicUsize,
    fail_at: Option<i64>,
    truncate: bool,
}

impl MemoryServer {
    fn every(step: i64, until: i64) -> Self {
        Self {
            events: (0..until).step_by(step as usize).collect(),
            exports: AtomicUsize::new(0),
            fail_at: None,
            truncate: false,
        }
    }

    fn count(&self, start: i64, end: i64) -> u64 {
        self.events.iter().filter(|&&t| start <= t && t <= end).count() as u64
    }
}

#[async_trait]
impl AggregateCounter for MemoryServer {
    async fn query(&self, start: i64, end: i64) -> FetcherResult<Vec<Bin>> {
        let width = end - start + 1;
        let buckets = width.min(4);
        Ok((0..buckets)
            .map(|i| {
                let s = start + i * width / buckets;
                let e = start + (i + 1) * width / buckets - 1;
                Bin::new(s, e, self.count(s, e))
            })
            .collect())
    }
}

#[async_trait]
impl EventDownloader for MemoryServer {
    async fn fetch(&self, start: i64, end: i64, format: OutputFormat) -> FetcherResult<ByteStream> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(start) {
            return Err(FetcherError::HttpError("HTTP 503 Service Unavailable".to_string()));
        }

        let selected: Vec<i64> = self
            .events
            .iter()
            .copied()
            .filter(|&t| start <= t && t <= end)
            .collect();
        let body = match format {
            OutputFormat::Json => json!({
                "from": 0,
                "to": selected.len(),
                "hasMoreResults": self.truncate,
                "messages": selected
                    .iter()
                    .map(|t| json!({"text": format!("event at {t}"), "timestamp": t, "fields": []}))
                    .collect::<Vec<_>>(),
            })
            .to_string(),
            OutputFormat::Raw => selected
                .iter()
                .map(|t| format!("event at {t}\n"))
                .collect(),
        };

        // Two chunks, as a real response body would arrive
        let bytes = Bytes::from(body);
        let mid = bytes.len() / 2;
        let chunks: Vec<FetcherResult<Bytes>> = vec![Ok(bytes.slice(..mid)), Ok(bytes.slice(mid..))];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

async fn plan(server: &MemoryServer, maximum: u64) -> Vec<Bin> {
    let planner = FetchPlanner::new(server);
    let (partition, metrics) = planner.plan(0, 9999, maximum).await.unwrap();
    assert_eq!(metrics.total_events, server.events.len() as u64);
    partition
}

#[tokio::test]
async fn test_plan_covers_range_within_maximum() {
    let server = MemoryServer::every(7, 10_000);
    let partition = plan(&server, 100).await;

    assert!(partition.iter().all(|b| b.count <= 100));
    assert!(contiguous(&partition));
    assert_eq!(partition.first().unwrap().start, 0);
    assert_eq!(partition.last().unwrap().end, 9999);
    // Merging leaves no two neighbours that would still fit together
    assert!(partition.windows(2).all(|w| w[0].count + w[1].count > 100));
}

#[tokio::test]
async fn test_export_then_rerun_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let store = BinFileStore::new(temp.path());
    let server = MemoryServer::every(7, 10_000);
    let partition = plan(&server, 250).await;

    let first = ExportExecutor::new(&server)
        .with_shutdown(ShutdownCoordinator::shared())
        .run_export(&partition, &store, OutputFormat::Json)
        .await
        .unwrap();
    assert!(first.is_complete(partition.len()));
    assert_eq!(first.totals.downloaded, partition.len());
    assert_eq!(server.exports.load(Ordering::SeqCst), partition.len());
    for bin in &partition {
        assert_eq!(store.validate(bin, OutputFormat::Json), ArtifactStatus::Valid);
    }

    let second = ExportExecutor::new(&server)
        .with_shutdown(ShutdownCoordinator::shared())
        .run_export(&partition, &store, OutputFormat::Json)
        .await
        .unwrap();
    assert_eq!(second.totals.skipped, partition.len());
    assert_eq!(second.totals.bytes, 0);
    assert_eq!(server.exports.load(Ordering::SeqCst), partition.len());
}

#[tokio::test]
async fn test_raw_export() {
    let temp = TempDir::new().unwrap();
    let store = BinFileStore::new(temp.path());
    let server = MemoryServer::every(13, 10_000);
    let partition = plan(&server, 300).await;

    let report = ExportExecutor::new(&server)
        .with_shutdown(ShutdownCoordinator::shared())
        .run_export(&partition, &store, OutputFormat::Raw)
        .await
        .unwrap();
    assert!(report.is_complete(partition.len()));

    let names = store.list_artifacts().unwrap();
    assert_eq!(names.len(), partition.len());
    let planner = FetchPlanner::new(&server);
    assert!(planner.check_foreign_files(&partition, &store).is_ok());
}

#[tokio::test]
async fn test_foreign_files_are_refused() {
    let temp = TempDir::new().unwrap();
    let store = BinFileStore::new(temp.path());
    let server = MemoryServer::every(7, 10_000);
    let partition = plan(&server, 100).await;

    std::fs::write(temp.path().join("output.1"), "left over").unwrap();
    let planner = FetchPlanner::new(&server);
    match planner.check_foreign_files(&partition, &store) {
        Err(PlanError::ForeignFiles { files, .. }) => assert_eq!(files, vec!["output.1"]),
        other => panic!("expected ForeignFiles, got {other:?}"),
    }
}

#[tokio::test]
async fn test_truncated_export_is_inconsistent() {
    let temp = TempDir::new().unwrap();
    let store = BinFileStore::new(temp.path());
    let mut server = MemoryServer::every(7, 10_000);
    server.truncate = true;
    let partition = plan(&server, 500).await;

    let result = ExportExecutor::new(&server)
        .with_shutdown(ShutdownCoordinator::shared())
        .run_export(&partition, &store, OutputFormat::Json)
        .await;
    match result {
        Err(DownloadError::ArtifactInconsistency { reason, .. }) => {
            assert!(reason.contains("hasMoreResults"))
        }
        other => panic!("expected ArtifactInconsistency, got {other:?}"),
    }
    assert_eq!(server.exports.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transfer_failure_stops_run() {
    let temp = TempDir::new().unwrap();
    let store = BinFileStore::new(temp.path());
    let mut server = MemoryServer::every(7, 10_000);
    let partition = plan(&server, 250).await;
    assert!(partition.len() >= 3);
    server.fail_at = Some(partition[1].start);

    let report = ExportExecutor::new(&server)
        .with_shutdown(ShutdownCoordinator::shared())
        .run_export(&partition, &store, OutputFormat::Json)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(matches!(report.outcomes[0].outcome, BinOutcome::Downloaded(_)));
    assert_eq!(report.failure().unwrap().bin, partition[1]);
    assert!(!report.is_complete(partition.len()));
    assert_eq!(store.validate(&partition[1], OutputFormat::Json), ArtifactStatus::Missing);
}

#[tokio::test]
async fn test_interrupted_before_first_bin() {
    let temp = TempDir::new().unwrap();
    let store = BinFileStore::new(temp.path());
    let server = MemoryServer::every(7, 10_000);
    let partition = plan(&server, 250).await;

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let result = ExportExecutor::new(&server)
        .with_shutdown(shutdown)
        .run_export(&partition, &store, OutputFormat::Json)
        .await;

    assert!(matches!(
        result,
        Err(DownloadError::Interrupted { completed: 0, .. })
    ));
    assert_eq!(server.exports.load(Ordering::SeqCst), 0);
}
