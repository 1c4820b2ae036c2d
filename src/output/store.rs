//! One artifact per bin
//!
//! Every bin of a final partition owns exactly one file, `output.<start>`,
//! in the output directory. Before anything is downloaded the existing file
//! is checked so that re-running an interrupted export only fetches what is
//! missing.

use super::{OutputError, OutputResult};
use crate::downloader::config::ARTIFACT_PREFIX;
use crate::fetcher::EventDownloader;
use crate::{Bin, OutputFormat};
use futures_util::StreamExt;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// State of the artifact a bin expects on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// Present and consistent with the bin
    Valid,
    /// Present but truncated, unparsable or holding the wrong number of events
    Invalid(String),
    /// Not present
    Missing,
}

impl ArtifactStatus {
    /// Whether the artifact can be skipped
    pub fn is_valid(&self) -> bool {
        matches!(self, ArtifactStatus::Valid)
    }
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactStatus::Valid => write!(f, "valid"),
            ArtifactStatus::Invalid(reason) => write!(f, "invalid: {reason}"),
            ArtifactStatus::Missing => write!(f, "missing"),
        }
    }
}

/// Directory of per-bin artifacts
#[derive(Debug, Clone)]
pub struct BinFileStore {
    root: PathBuf,
}

impl BinFileStore {
    /// Store rooted at `root`; nothing is touched until a write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name of the artifact owned by `bin`
    pub fn artifact_name(bin: &Bin) -> String {
        format!("{ARTIFACT_PREFIX}{}", bin.start)
    }

    /// Path of the artifact owned by `bin`
    pub fn artifact_path(&self, bin: &Bin) -> PathBuf {
        self.root.join(Self::artifact_name(bin))
    }

    /// Create the output directory if it does not exist
    pub fn ensure_dir(&self) -> OutputResult<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| OutputError::IoError(e.to_string()))
    }

    /// Names of every artifact-like file in the directory, sorted
    ///
    /// A directory that does not exist yet holds no artifacts.
    pub fn list_artifacts(&self) -> OutputResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OutputError::IoError(e.to_string())),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| OutputError::IoError(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(ARTIFACT_PREFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Check the artifact of `bin` against its expected contents
    ///
    /// - JSON: the document must report `to == bin.count` and
    ///   `hasMoreResults == false`
    /// - RAW: the file must hold at least `bin.count` lines; multi-line
    ///   messages make the exact count unknowable
    pub fn validate(&self, bin: &Bin, format: OutputFormat) -> ArtifactStatus {
        let path = self.artifact_path(bin);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return ArtifactStatus::Missing,
            Err(e) => return ArtifactStatus::Invalid(format!("Unable to open: {e}")),
        };

        let status = match format {
            OutputFormat::Json => validate_json(file, bin),
            OutputFormat::Raw => validate_raw(file, bin),
        };
        if let ArtifactStatus::Invalid(reason) = &status {
            info!(path = %path.display(), "InconsistentFile: {}", reason);
        }
        status
    }

    /// Delete the artifact of `bin`
    pub fn remove(&self, bin: &Bin) -> OutputResult<()> {
        let path = self.artifact_path(bin);
        std::fs::remove_file(&path).map_err(|e| {
            OutputError::IoError(format!("Failed to remove {}: {e}", path.display()))
        })
    }

    /// Stream the events of `bin` into a freshly created artifact
    ///
    /// The file is created exclusively: if it already exists nothing is
    /// requested and [`OutputError::Collision`] is returned. A transfer that
    /// fails midway leaves a partial file behind, which the next run
    /// classifies as invalid.
    ///
    /// Returns the number of bytes written.
    pub async fn download<D>(&self, bin: &Bin, format: OutputFormat, downloader: &D) -> OutputResult<u64>
    where
        D: EventDownloader + ?Sized,
    {
        let path = self.artifact_path(bin);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => OutputError::Collision { path: path.clone() },
                _ => OutputError::IoError(format!("Failed to create {}: {e}", path.display())),
            })?;

        let mut stream = match downloader.fetch(bin.start, bin.end, format).await {
            Ok(stream) => stream,
            Err(e) => {
                // Nothing was transferred; leave no empty artifact behind
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e.into());
            }
        };
        let mut bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| OutputError::IoError(format!("Failed to write {}: {e}", path.display())))?;
            bytes += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| OutputError::IoError(format!("Failed to flush {}: {e}", path.display())))?;

        debug!(path = %path.display(), bytes = bytes, "Artifact written");
        Ok(bytes)
    }
}

fn validate_json(file: File, bin: &Bin) -> ArtifactStatus {
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let body: Value = match serde_json::from_reader(BufReader::new(file)) {
        Ok(body) => body,
        Err(_) => return ArtifactStatus::Invalid(format!("Not valid JSON; size {size}")),
    };
    let Some(body) = body.as_object() else {
        return ArtifactStatus::Invalid("Not a JSON object".to_string());
    };

    let Some(to) = body.get("to") else {
        return ArtifactStatus::Invalid("Missing required key 'to'".to_string());
    };
    if to.as_u64() != Some(bin.count) {
        return ArtifactStatus::Invalid(format!("Incorrect quantity of events, found {to}"));
    }

    match body.get("hasMoreResults") {
        None => ArtifactStatus::Invalid("Missing required key 'hasMoreResults'".to_string()),
        Some(Value::Bool(false)) => ArtifactStatus::Valid,
        Some(_) => ArtifactStatus::Invalid("Contains hasMoreResults=true, should be false".to_string()),
    }
}

fn validate_raw(file: File, bin: &Bin) -> ArtifactStatus {
    let mut lines = 0u64;
    for line in BufReader::new(file).split(b'\n') {
        if let Err(e) = line {
            return ArtifactStatus::Invalid(format!("Unable to read: {e}"));
        }
        lines += 1;
    }
    if lines < bin.count {
        return ArtifactStatus::Invalid(format!(
            "Incorrect quantity of events, should be at least {}, found {lines} lines",
            bin.count
        ));
    }
    ArtifactStatus::Valid
}
