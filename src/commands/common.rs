//! Common CLI options shared across commands.
//!
//! Argument structures composed into command structs with
//! `#[command(flatten)]`.

use std::path::PathBuf;

use clap::Args;

use fgdup_lib::validation::validate_file_exists;

/// Common input/output options for commands reading and writing BAM.
#[derive(Debug, Clone, Args)]
pub struct BamIoOptions {
    /// Input BAM file (coordinate sorted, indexed)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// Output BAM file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
}

impl BamIoOptions {
    /// Validates that the input file exists.
    ///
    /// # Errors
    /// Returns an error if the input file does not exist.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_file_exists(&self.input, "Input BAM")
    }
}

/// Threading options for partitioned processing.
#[derive(Debug, Clone, Args)]
pub struct ThreadingOptions {
    /// Number of worker threads
    #[arg(short = 't', long = "threads", default_value = "1")]
    pub threads: usize,
}

impl ThreadingOptions {
    /// A log line describing the configuration.
    #[must_use]
    pub fn log_message(&self) -> String {
        if self.threads <= 1 {
            "Threads: 1 (single-threaded)".to_string()
        } else {
            format!("Threads: {}", self.threads)
        }
    }
}
