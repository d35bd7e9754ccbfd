//! Metrics collection and reporting.
//!
//! Each partition accumulates its own [`CollapseMetrics`]; the per-partition
//! instances are merged once at end of run rather than sharing mutable
//! counters across threads. Metrics are written as TSV via
//! [`fgoxide::io::DelimFile`].

use anyhow::{Context, Result};
use fgoxide::io::DelimFile;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::{format_count, format_percent};

/// A metric type that can be serialized to TSV files.
pub trait Metric: Serialize + for<'de> Deserialize<'de> + Clone + Default {
    /// Human-readable name for this metric type.
    fn metric_name() -> &'static str;
}

/// Write metrics to a TSV file with consistent error handling.
///
/// # Errors
/// Returns an error if the file cannot be created or written to.
pub fn write_metrics<P: AsRef<Path>, T: Metric>(path: P, metrics: &[T]) -> Result<()> {
    let path_ref = path.as_ref();
    DelimFile::default().write_tsv(&path, metrics).with_context(|| {
        format!("Failed to write {} metrics: {}", T::metric_name(), path_ref.display())
    })
}

/// Metrics collected while collapsing duplicates.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CollapseMetrics {
    /// Total records read from the input.
    pub reads_processed: u64,
    /// Records written to the output.
    pub reads_written: u64,
    /// Records dropped (unmapped supplementaries, removed duplicates).
    pub reads_dropped: u64,
    /// Reads flagged as duplicates.
    pub duplicate_reads: u64,
    /// Duplicate groups emitted.
    pub duplicate_groups: u64,
    /// Reads emitted without any duplicate partner.
    pub singleton_reads: u64,
    /// UMI bucket merges performed by the clustering passes.
    pub umi_merges: u64,
    /// Dual-strand groups produced by the duplex merge.
    pub duplex_groups: u64,
    /// Fragments absorbed by the jitter merge.
    pub jitter_merges: u64,
    /// Fragments absorbed by the poly-tail merge.
    pub poly_tail_merges: u64,
    /// Fragments absorbed by the platform-distance collapse.
    pub distance_merges: u64,
    /// Reads deferred across a partition boundary.
    pub deferred_reads: u64,
    /// Deferred reads never claimed, flushed without classification.
    pub unresolved_reads: u64,
    /// Reads that fell outside the cache's addressable window.
    pub out_of_window_reads: u64,
    /// Reads that failed to resolve against a defined UMI allow-list.
    pub unresolved_defined_umis: u64,
    /// Pre-existing consensus reads passed through untouched.
    pub consensus_passthrough_reads: u64,
}

impl CollapseMetrics {
    /// Merge another `CollapseMetrics` into this one.
    pub fn merge(&mut self, other: &CollapseMetrics) {
        self.reads_processed += other.reads_processed;
        self.reads_written += other.reads_written;
        self.reads_dropped += other.reads_dropped;
        self.duplicate_reads += other.duplicate_reads;
        self.duplicate_groups += other.duplicate_groups;
        self.singleton_reads += other.singleton_reads;
        self.umi_merges += other.umi_merges;
        self.duplex_groups += other.duplex_groups;
        self.jitter_merges += other.jitter_merges;
        self.poly_tail_merges += other.poly_tail_merges;
        self.distance_merges += other.distance_merges;
        self.deferred_reads += other.deferred_reads;
        self.unresolved_reads += other.unresolved_reads;
        self.out_of_window_reads += other.out_of_window_reads;
        self.unresolved_defined_umis += other.unresolved_defined_umis;
        self.consensus_passthrough_reads += other.consensus_passthrough_reads;
    }

    /// Fraction of processed reads flagged as duplicates.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duplicate_rate(&self) -> f64 {
        if self.reads_processed == 0 {
            0.0
        } else {
            self.duplicate_reads as f64 / self.reads_processed as f64
        }
    }

    /// Checks reads-in vs reads-out and logs a warning on any unexplained
    /// discrepancy. Explicitly-dropped categories are accounted separately,
    /// so the run still completes.
    pub fn check_integrity(&self) {
        let accounted = self.reads_written + self.reads_dropped;
        if accounted != self.reads_processed {
            let discrepancy = self.reads_processed.abs_diff(accounted);
            warn!(
                "Read count mismatch: {} processed vs {} written + {} dropped \
                 (discrepancy {})",
                format_count(self.reads_processed),
                format_count(self.reads_written),
                format_count(self.reads_dropped),
                format_count(discrepancy)
            );
        }
    }

    /// Logs a human-readable summary.
    pub fn log_summary(&self) {
        info!("Reads processed: {}", format_count(self.reads_processed));
        info!("Reads written: {}", format_count(self.reads_written));
        info!(
            "Duplicate reads: {} ({})",
            format_count(self.duplicate_reads),
            format_percent(self.duplicate_rate(), 2)
        );
        info!(
            "Duplicate groups: {} (dual-strand {})",
            format_count(self.duplicate_groups),
            format_count(self.duplex_groups)
        );
        info!(
            "Merges: {} umi, {} jitter, {} poly-tail, {} distance",
            format_count(self.umi_merges),
            format_count(self.jitter_merges),
            format_count(self.poly_tail_merges),
            format_count(self.distance_merges)
        );
        if self.deferred_reads > 0 || self.unresolved_reads > 0 {
            info!(
                "Cross-partition reads: {} deferred, {} unresolved",
                format_count(self.deferred_reads),
                format_count(self.unresolved_reads)
            );
        }
    }
}

impl Metric for CollapseMetrics {
    fn metric_name() -> &'static str {
        "duplicate collapsing"
    }
}
