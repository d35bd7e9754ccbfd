//! UMI-aware duplicate collapsing command.
//!
//! Marks (or removes) duplicate reads in a coordinate-sorted, indexed BAM.
//!
//! # Algorithm
//!
//! 1. Split the genome into partitions and run one windowed read cache per
//!    worker thread
//! 2. Group evicted reads by fragment coordinates, then cluster by UMI
//! 3. Run the duplex, jitter, poly-tail and platform-distance merge passes
//! 4. Select the highest-quality read of each group as the representative
//!    and flag every other member as a duplicate
//!
//! # Output Modes
//!
//! - Mark only: set the duplicate flag on non-representative reads (default)
//! - Remove: exclude duplicate reads from the output

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};

use fgdup_lib::bam_io::{create_bam_reader, create_bam_writer, finish_bam_writer};
use fgdup_lib::header::{add_pg_record, require_coordinate_sorted};
use fgdup_lib::logging::OperationTimer;
use fgdup_lib::metrics::write_metrics;
use fgdup_lib::partition::{CollapseOptions, PartitionList, run_partitioned};
use fgdup_lib::umi::DefinedUmis;
use fgdup_lib::validation::validate_positive;

use crate::commands::command::Command;
use crate::commands::common::{BamIoOptions, ThreadingOptions};

/// Mark and collapse duplicate reads using fragment coordinates and UMIs.
#[derive(Parser, Debug)]
pub struct Collapse {
    /// Input and output BAM files
    #[command(flatten)]
    pub io: BamIoOptions,

    /// Path to write collapse metrics
    #[arg(short = 'm', long = "metrics")]
    pub metrics: Option<PathBuf>,

    /// Remove duplicates instead of just marking them
    #[arg(short = 'r', long = "remove-duplicates", default_value = "false")]
    pub remove_duplicates: bool,

    /// Cache bucket width in bases (must exceed the maximum soft-clip length)
    #[arg(long = "group-size", default_value = "300")]
    pub group_size: u32,

    /// Maximum soft-clip length guarding forward-anchored eviction
    #[arg(long = "max-soft-clip", default_value = "150")]
    pub max_soft_clip: u32,

    /// Cluster reads by UMI (disable for coordinate-only marking)
    #[arg(long = "umi", default_value = "true", action = clap::ArgAction::Set)]
    pub umi: bool,

    /// Read-identifier delimiter preceding the UMI suffix
    #[arg(long = "umi-delimiter", default_value = ":")]
    pub umi_delimiter: char,

    /// Enable duplex UMI half matching
    #[arg(long = "duplex", default_value = "false")]
    pub duplex: bool,

    /// Delimiter between duplex UMI halves
    #[arg(long = "duplex-delimiter", default_value = "-")]
    pub duplex_delimiter: char,

    /// Permitted UMI base difference for clustering
    #[arg(short = 'e', long = "edits", default_value = "1")]
    pub edits: u32,

    /// Large-group threshold and size ratio for the imbalance pass
    #[arg(long = "imbalance-ratio", default_value = "10")]
    pub imbalance_ratio: usize,

    /// UMI tolerance for the imbalance pass
    #[arg(long = "imbalance-edits", default_value = "3")]
    pub imbalance_edits: u32,

    /// Maximum single-end shift for the jitter merge (0 disables)
    #[arg(long = "jitter-distance", default_value = "3")]
    pub jitter_distance: i64,

    /// UMI tolerance reserved for the jitter merge
    #[arg(long = "jitter-umi-edits", default_value = "0")]
    pub jitter_umi_edits: u32,

    /// Minimum trailing single-base run for the poly-tail merge (0 disables)
    #[arg(long = "poly-tail-min-length", default_value = "2")]
    pub poly_tail_min_length: usize,

    /// Maximum combined end distance for the platform collapse (0 disables)
    #[arg(long = "collapse-distance", default_value = "0")]
    pub collapse_distance: i64,

    /// File of literal allow-listed UMIs, one per line
    #[arg(long = "defined-umis")]
    pub defined_umis: Option<PathBuf>,

    /// Genomic partition width in bases
    #[arg(long = "partition-size", default_value = "50000000")]
    pub partition_size: usize,

    /// Threading options for partitioned processing
    #[command(flatten)]
    pub threading: ThreadingOptions,
}

impl Collapse {
    fn collapse_options(&self) -> Result<CollapseOptions> {
        // A missing allow-list file quietly disables the feature.
        let defined_umis = match &self.defined_umis {
            Some(path) if path.exists() => Some(
                DefinedUmis::load(path)
                    .with_context(|| format!("Failed to load defined UMIs: {}", path.display()))?,
            ),
            Some(path) => {
                warn!("Defined UMI file {} not found; feature disabled", path.display());
                None
            }
            None => None,
        };

        Ok(CollapseOptions {
            group_size: self.group_size,
            max_soft_clip: self.max_soft_clip,
            umi_enabled: self.umi,
            umi_delimiter: self.umi_delimiter,
            duplex_enabled: self.duplex,
            duplex_delimiter: self.duplex_delimiter,
            permitted_base_diff: self.edits,
            imbalance_ratio: self.imbalance_ratio,
            imbalance_base_diff: self.imbalance_edits,
            jitter_distance: self.jitter_distance,
            jitter_umi_edits: self.jitter_umi_edits,
            poly_tail_min_length: self.poly_tail_min_length,
            collapse_distance: self.collapse_distance,
            partition_size: self.partition_size,
            threads: self.threading.threads,
            remove_duplicates: self.remove_duplicates,
            defined_umis,
        })
    }
}

impl Command for Collapse {
    fn execute(&self, command_line: &str) -> Result<()> {
        self.io.validate()?;
        validate_positive(self.group_size, "group-size")?;
        validate_positive(self.partition_size, "partition-size")?;
        if u64::from(self.group_size) <= u64::from(self.max_soft_clip) {
            bail!(
                "group-size ({}) must exceed max-soft-clip ({})",
                self.group_size,
                self.max_soft_clip
            );
        }

        let timer = OperationTimer::new("Collapsing duplicates");

        info!("Input: {}", self.io.input.display());
        info!("Output: {}", self.io.output.display());
        info!("UMI clustering: {} (edits {})", self.umi, self.edits);
        if self.duplex {
            info!("Duplex matching enabled (delimiter '{}')", self.duplex_delimiter);
        }
        info!("Window: group-size {}, max-soft-clip {}", self.group_size, self.max_soft_clip);
        info!("{}", self.threading.log_message());

        let (_, header) = create_bam_reader(&self.io.input)?;
        require_coordinate_sorted(&header)?;

        let output_header =
            add_pg_record(header.clone(), crate::version::VERSION.as_str(), command_line)?;

        let options = self.collapse_options()?;
        let partitions =
            PartitionList::build(&header, self.partition_size, self.threading.threads);
        if partitions.is_empty() {
            bail!("Input header declares no reference sequences");
        }

        let mut writer = create_bam_writer(&self.io.output, &output_header)?;
        let metrics =
            run_partitioned(&self.io.input, &mut writer, &header, &partitions, &options)?;
        finish_bam_writer(writer)?;

        metrics.log_summary();
        if let Some(path) = &self.metrics {
            write_metrics(path, std::slice::from_ref(&metrics))?;
            info!("Metrics written to {}", path.display());
        }

        timer.log_completion(metrics.reads_processed);
        Ok(())
    }
}
