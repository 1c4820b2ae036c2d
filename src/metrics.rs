//! Observability metrics for the exporter
//!
//! Counters and histograms are emitted through the `metrics` facade and are
//! only scraped when a Prometheus exporter has been installed with
//! [`init_metrics`]. Without it every call is a no-op. Nothing in the crate
//! reads these values back; run totals are returned explicitly by the planner
//! and the executor.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: a second call is a no-op.
///
/// # Errors
/// Fails when the scrape endpoint cannot be bound.
pub async fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the server"
    );
    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds, up to the response headers"
    );
    describe_counter!(
        "aggregate_queries_total",
        Unit::Count,
        "Total number of aggregate count queries issued while planning"
    );
    describe_counter!(
        "artifacts_downloaded_total",
        Unit::Count,
        "Total number of per-bin artifacts downloaded"
    );
    describe_counter!(
        "artifacts_skipped_total",
        Unit::Count,
        "Total number of per-bin artifacts skipped because they were already valid"
    );
    describe_counter!(
        "artifact_bytes_total",
        Unit::Bytes,
        "Total bytes written into artifacts"
    );
    describe_histogram!(
        "artifact_download_duration_seconds",
        Unit::Seconds,
        "Time taken to stream one artifact to disk"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Record an HTTP request with timing
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            attempt = attempt,
            "Starting HTTP request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record the response status
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("http_retries_total").increment(1);
    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record one aggregate count query
pub fn record_aggregate_query() {
    counter!("aggregate_queries_total").increment(1);
}

/// Record an artifact left untouched because it already validated
pub fn record_artifact_skipped() {
    counter!("artifacts_skipped_total").increment(1);
}

/// Per-artifact download timing
pub struct ArtifactMetrics {
    start: i64,
    start_time: Instant,
}

impl ArtifactMetrics {
    /// Start timing the artifact of the bin beginning at `start`
    pub fn start(start: i64) -> Self {
        Self {
            start,
            start_time: Instant::now(),
        }
    }

    /// Record a completed download of `bytes` bytes
    pub fn record_success(&self, bytes: u64) {
        let duration = self.start_time.elapsed();

        counter!("artifacts_downloaded_total").increment(1);
        counter!("artifact_bytes_total").increment(bytes);
        histogram!("artifact_download_duration_seconds").record(duration.as_secs_f64());

        debug!(
            start = self.start,
            bytes = bytes,
            duration_ms = duration.as_millis(),
            "Artifact download recorded"
        );
    }
}
