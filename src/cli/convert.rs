//! Convert command: JSON artifacts to ingestion API payloads

use crate::convert::{convert_file, ChunkLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_LENGTH};
use clap::Parser;
use std::path::PathBuf;

use super::CliError;

/// Arguments for the convert command
#[derive(Parser, Debug)]
#[command(
    after_help = "Import hint: for X in OUTPUTDIR/*; do curl -k -d @$X https://li.example.com:9543/api/v1/events/ingest/0; done"
)]
pub struct ConvertArgs {
    /// JSON-formatted files produced by `loginsight-export export`
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Write converted data to this existing directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Largest quantity of events to write in a single file
    #[arg(long, default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,

    /// Largest byte size of a single file
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    pub max_bytes: usize,
}

impl ConvertArgs {
    /// Convert every input file into chunk files under the output directory
    pub fn execute(&self, quiet: bool) -> Result<(), CliError> {
        if !self.output.is_dir() {
            return Err(CliError::InvalidArgument(format!(
                "{} is not a directory",
                self.output.display()
            )));
        }
        let limits = ChunkLimits::new(self.max_bytes, self.max_length)?;

        let mut files = 0;
        let mut events = 0;
        let mut dropped = 0;
        for input in &self.files {
            let summary = convert_file(input, &self.output, limits)?;
            files += summary.outputs.len();
            events += summary.events;
            dropped += summary.dropped;
        }

        if !quiet {
            println!(
                "Converted {} input file(s) into {files} file(s) holding {events} events ({dropped} dropped)",
                self.files.len()
            );
        }
        Ok(())
    }
}
