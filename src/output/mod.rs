//! Per-bin artifact storage

use crate::fetcher::FetcherError;
use std::path::PathBuf;

pub mod lock;
pub mod store;

pub use lock::OutputLock;
pub use store::{ArtifactStatus, BinFileStore};

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// An artifact already exists where a new one was about to be created
    #[error("file exists: {}", path.display())]
    Collision {
        /// Existing artifact
        path: PathBuf,
    },

    /// Another export holds the output directory
    #[error("lock error: {0}")]
    LockError(String),

    /// The byte stream feeding an artifact failed
    #[error("transfer failed: {0}")]
    Transfer(#[from] FetcherError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
