//! Export configuration constants

use std::time::Duration;

/// Default maximum number of events per bin.
/// Well under the server's hard export cap, so a bin that grows slightly
/// between planning and download still exports completely.
pub const DEFAULT_MAXIMUM: u64 = 2000;

/// Largest maximum the command line accepts (the server's export cap)
pub const MAXIMUM_LIMIT: u64 = 20_000;

/// Maximum number of retries for failed requests.
/// 5 retries with exponential backoff allows recovery from transient network issues
/// while avoiding infinite loops on persistent failures (max total wait ~1 minute).
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// Caps exponential backoff (retry 5 = 32s capped to 30s).
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// File name prefix of every per-bin artifact
pub const ARTIFACT_PREFIX: &str = "output.";

/// Advisory lock file guarding an output directory
pub const LOCK_FILE_NAME: &str = ".loginsight-export.lock";

/// Exit status for an artifact that is still invalid after download (EX_DATAERR)
pub const EXIT_ARTIFACT_INCONSISTENT: i32 = 65;

/// Exit status for an internal partitioning failure (EX_SOFTWARE)
pub const EXIT_PARTITION_FAILURE: i32 = 70;

/// Exit status when an artifact appeared underneath us (EX_IOERR)
pub const EXIT_ARTIFACT_COLLISION: i32 = 74;

/// Exit status after Ctrl+C
pub const EXIT_INTERRUPTED: i32 = 130;

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}
