//! Server collaborators
//!
//! The planner and the executor only see two narrow traits: one that answers
//! "how many events fall into each slice of this range" and one that streams
//! the events of a range in a given export format. [`http::LogInsightClient`]
//! implements both against a live server.

use crate::{Bin, OutputFormat};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;

pub mod aggregate;
pub mod http;
pub mod shared_resources;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Network error
    #[error("network error: {0}")]
    NetworkError(String),

    /// Server rejected our credentials or session
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Aggregate query is grouped by something other than time alone
    #[error("unsupported grouping: {0}")]
    UnsupportedGrouping(String),

    /// Client could not be configured
    #[error("configuration error: {0}")]
    Config(String),

    /// The server presented a TLS certificate that is not trusted
    #[error(
        "the server's TLS certificate isn't trusted: {0}. Add it to the system trust store, \
         or save it with `--save foo.pem` and pass `--ca-cert foo.pem`"
    )]
    UntrustedCertificate(String),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Stream of raw export bytes for a single range
pub type ByteStream = Pin<Box<dyn Stream<Item = FetcherResult<Bytes>> + Send>>;

/// Source of per-slice event counts
#[async_trait]
pub trait AggregateCounter: Send + Sync {
    /// Return the server's own partition of `[start, end]` with a count per bin
    ///
    /// Bins may extend past the requested boundaries; callers patch them.
    ///
    /// # Errors
    /// Transport and server errors, and responses grouped by anything other
    /// than time.
    async fn query(&self, start: i64, end: i64) -> FetcherResult<Vec<Bin>>;
}

/// Source of exported event bytes
#[async_trait]
pub trait EventDownloader: Send + Sync {
    /// Stream the events of `[start, end]` in `format`
    async fn fetch(&self, start: i64, end: i64, format: OutputFormat)
        -> FetcherResult<ByteStream>;
}
