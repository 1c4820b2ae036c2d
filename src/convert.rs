//! Conversion of JSON artifacts into ingestion API payloads
//!
//! A JSON artifact holds messages in the export shape. The ingestion API
//! wants `{"events":[{"text", "timestamp", "fields":[{"name", "content"}]}]}`
//! and caps both the body size and the number of events per request, so a
//! single artifact usually becomes several output files.
//!
//! Nothing here touches the network; the files are meant to be posted as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest `text` accepted by the ingestion API, in bytes
pub const MAXIMUM_TEXT_BYTES: usize = 16 * 1024;

/// Largest request body accepted by the ingestion API
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024 * 1024;

/// Most events accepted in a single ingestion request
pub const DEFAULT_MAX_LENGTH: usize = 500;

/// Fields the server assigns itself on ingestion
const RESERVED_FIELDS: &[&str] = &["event_type"];

const PRELUDE: &str = "{\"events\":[";
const TRAILER: &str = "]}";
const SEPARATOR: &str = ",";

/// Conversion errors
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Reading an input or writing an output failed
    #[error("I/O error on {path}: {message}")]
    IoError {
        /// File involved
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Input is not a JSON export artifact
    #[error("{path} is not a JSON export artifact: {message}")]
    ParseError {
        /// File involved
        path: PathBuf,
        /// What was wrong with it
        message: String,
    },

    /// Chunk limits leave no room for any event
    #[error("Invalid chunk limits: {0}")]
    InvalidLimits(String),

    /// Serializing an event failed
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for conversion
pub type ConvertResult<T> = Result<T, ConvertError>;

/// One message as found in a JSON export artifact
#[derive(Debug, Clone, Deserialize)]
pub struct ExportedMessage {
    /// Raw event text
    pub text: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    /// Extracted and static fields
    #[serde(default)]
    pub fields: Vec<ExportedField>,
}

/// One field of an exported message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedField {
    /// Server-side name, preferred when present
    #[serde(default)]
    pub internal_name: Option<String>,
    /// Name shown in the UI
    #[serde(default)]
    pub display_name: Option<String>,
    /// Field value, kept verbatim
    #[serde(default)]
    pub value: Value,
}

/// A whole JSON export artifact
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedDocument {
    /// Set when the server truncated the export
    #[serde(default)]
    pub has_more_results: Option<bool>,
    /// Exported messages
    pub messages: Vec<ExportedMessage>,
}

/// Ingestion API field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestField {
    /// Sanitized field name
    pub name: String,
    /// Field value
    pub content: Value,
}

/// Ingestion API event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestEvent {
    /// Event text, at most [`MAXIMUM_TEXT_BYTES`] long
    pub text: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    /// Fields with sanitized names
    pub fields: Vec<IngestField>,
}

/// Make `name` acceptable as an ingestion field name
///
/// Lowercases, replaces anything outside `[a-z0-9_]` with `_`, collapses
/// runs of `_` and prefixes a leading digit with `_`.
pub fn crush_invalid_field_name(name: &str) -> String {
    let mut crushed = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        crushed.push('_');
    }
    for c in name.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        };
        if c == '_' && crushed.ends_with('_') {
            continue;
        }
        crushed.push(c);
    }
    crushed
}

/// Cut `text` to at most `max` bytes on a character boundary
fn truncate_text(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn convert_field(field: &ExportedField) -> Option<IngestField> {
    if let Some(internal) = field.internal_name.as_deref() {
        if RESERVED_FIELDS.contains(&internal) {
            return None;
        }
    }
    let name = field
        .internal_name
        .as_deref()
        .or(field.display_name.as_deref())
        .map(crush_invalid_field_name)
        .filter(|name| !name.is_empty());
    match name {
        Some(name) => Some(IngestField {
            name,
            content: field.value.clone(),
        }),
        None => {
            warn!(value = %field.value, "Dropping field without a usable name");
            None
        }
    }
}

/// Convert one exported message into an ingestion event
pub fn convert_message(message: &ExportedMessage) -> IngestEvent {
    IngestEvent {
        text: truncate_text(&message.text, MAXIMUM_TEXT_BYTES).to_string(),
        timestamp: message.timestamp,
        fields: message.fields.iter().filter_map(convert_field).collect(),
    }
}

/// Convert a whole export document
pub fn convert_document(document: &ExportedDocument) -> Vec<IngestEvent> {
    if document.has_more_results == Some(true) {
        warn!("Input is marked as having more results; the export it came from was truncated");
    }
    document.messages.iter().map(convert_message).collect()
}

/// Size and length caps for one output file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    max_bytes: usize,
    max_length: usize,
}

impl ChunkLimits {
    /// Validate and build limits
    ///
    /// # Errors
    /// [`ConvertError::InvalidLimits`] when `max_length` is zero or
    /// `max_bytes` cannot fit the `{"events":[]}` wrapper plus one byte.
    pub fn new(max_bytes: usize, max_length: usize) -> ConvertResult<Self> {
        if max_length == 0 {
            return Err(ConvertError::InvalidLimits(
                "max length must be > 0".to_string(),
            ));
        }
        let overhead = PRELUDE.len() + TRAILER.len();
        if max_bytes <= overhead {
            return Err(ConvertError::InvalidLimits(format!(
                "max bytes must be > {overhead} to include the events wrapper"
            )));
        }
        Ok(Self {
            max_bytes,
            max_length,
        })
    }

    /// Largest output file in bytes
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Most events per output file
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn max_payload(&self) -> usize {
        self.max_bytes - PRELUDE.len() - TRAILER.len()
    }
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

/// Packs serialized events into `{"events":[...]}` bodies within limits
#[derive(Debug)]
pub struct EventChunker {
    limits: ChunkLimits,
    pending: Vec<String>,
    pending_bytes: usize,
    dropped: u64,
}

impl EventChunker {
    /// Empty chunker
    pub fn new(limits: ChunkLimits) -> Self {
        Self {
            limits,
            pending: Vec::new(),
            pending_bytes: 0,
            dropped: 0,
        }
    }

    /// Items dropped for being larger than a whole chunk
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Add an item; returns a finished chunk when the item did not fit
    pub fn push<T: Serialize>(&mut self, item: &T) -> ConvertResult<Option<String>> {
        let serialized = serde_json::to_string(item)?;
        let max_payload = self.limits.max_payload();

        if serialized.len() > max_payload {
            self.dropped += 1;
            warn!(
                size = serialized.len(),
                maximum = max_payload,
                "Dropping item larger than an entire chunk"
            );
            return Ok(None);
        }

        let separator = if self.pending.is_empty() { 0 } else { SEPARATOR.len() };
        let fits = self.pending_bytes + separator + serialized.len() <= max_payload
            && self.pending.len() < self.limits.max_length;

        let finished = if fits { None } else { self.take() };
        if !self.pending.is_empty() {
            self.pending_bytes += SEPARATOR.len();
        }
        self.pending_bytes += serialized.len();
        self.pending.push(serialized);
        Ok(finished)
    }

    /// Flush whatever is pending
    pub fn finish(mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let body = format!("{PRELUDE}{}{TRAILER}", self.pending.join(SEPARATOR));
        self.pending.clear();
        self.pending_bytes = 0;
        Some(body)
    }
}

/// Pack `items` into chunk bodies
pub fn serialize_chunked<T: Serialize>(items: &[T], limits: ChunkLimits) -> ConvertResult<Vec<String>> {
    let mut chunker = EventChunker::new(limits);
    let mut chunks = Vec::new();
    for item in items {
        chunks.extend(chunker.push(item)?);
    }
    chunks.extend(chunker.finish());
    Ok(chunks)
}

/// Outcome of converting one input file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    /// Files written, in order
    pub outputs: Vec<PathBuf>,
    /// Events written
    pub events: u64,
    /// Events dropped for size
    pub dropped: u64,
}

/// Create `<stem>-<n>.json` in `dir` with the first free `n` at or after `next`
fn create_exclusive(dir: &Path, stem: &str, next: &mut usize, body: &str) -> ConvertResult<PathBuf> {
    loop {
        let path = dir.join(format!("{stem}-{next}.json"));
        *next += 1;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(body.as_bytes())
                    .and_then(|_| file.flush())
                    .map_err(|e| ConvertError::IoError {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(ConvertError::IoError {
                    path,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Convert the JSON artifact at `input` into chunk files under `output_dir`
///
/// Outputs are named after the input file and never overwrite an existing
/// file.
pub fn convert_file(input: &Path, output_dir: &Path, limits: ChunkLimits) -> ConvertResult<ConvertSummary> {
    info!(input = %input.display(), "Reading input file");
    let bytes = std::fs::read(input).map_err(|e| ConvertError::IoError {
        path: input.to_path_buf(),
        message: e.to_string(),
    })?;
    let document: ExportedDocument =
        serde_json::from_slice(&bytes).map_err(|e| ConvertError::ParseError {
            path: input.to_path_buf(),
            message: e.to_string(),
        })?;

    let events = convert_document(&document);
    let stem = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "events".to_string());

    let mut chunker = EventChunker::new(limits);
    let mut summary = ConvertSummary::default();
    let mut next = 0;
    let mut write = |body: String, summary: &mut ConvertSummary| -> ConvertResult<()> {
        let path = create_exclusive(output_dir, &stem, &mut next, &body)?;
        debug!(output = %path.display(), bytes = body.len(), "Wrote output file");
        summary.outputs.push(path);
        Ok(())
    };

    for event in &events {
        if let Some(body) = chunker.push(event)? {
            write(body, &mut summary)?;
        }
    }
    summary.dropped = chunker.dropped();
    if let Some(body) = chunker.finish() {
        write(body, &mut summary)?;
    }
    summary.events = events.len() as u64 - summary.dropped;

    info!(
        input = %input.display(),
        files = summary.outputs.len(),
        events = summary.events,
        dropped = summary.dropped,
        "Converted input file"
    );
    Ok(summary)
}
