//! Turns raw coordinate-matched reads into final duplicate groups.
//!
//! For each batch of coordinate-resolved reads emitted by the cache, the
//! builder runs the merge pipeline in its fixed order: UMI clustering,
//! duplex merge, jitter merge, poly-tail merge, then the platform-distance
//! collapse. With UMIs disabled the raw coordinate groups are final (only
//! the platform-distance collapse still applies when configured, since end
//! imprecision is a property of the platform, not of the UMIs).
//!
//! Every surviving group selects a representative read and singleton groups
//! are demoted back to singles before output.

use ahash::AHashMap;

use crate::fragment_coords::FragmentCoords;
use crate::merge::{distance_collapse, duplex_merge, jitter_merge, poly_tail_merge};
use crate::read_cache::FragmentCoordReads;
use crate::read_info::{Fragment, ReadInfo};
use crate::umi::group_builder::{UmiGroupBuilder, UmiGrouperConfig};

/// Configuration for duplicate group building.
pub struct GroupBuilderConfig {
    /// Whether UMI-aware clustering is enabled.
    pub umi_enabled: bool,
    /// Whether duplex half matching is enabled.
    pub duplex_enabled: bool,
    /// Delimiter between duplex UMI halves.
    pub duplex_delimiter: char,
    /// Permitted UMI base difference for clustering.
    pub permitted_base_diff: u32,
    /// Large-group threshold / size ratio for the imbalance pass.
    pub imbalance_ratio: usize,
    /// Wider tolerance for the imbalance pass.
    pub imbalance_base_diff: u32,
    /// Maximum single-end shift for the jitter merge (0 disables).
    pub jitter_distance: i64,
    /// Tight UMI tolerance reserved for the jitter merge.
    pub jitter_umi_edits: u32,
    /// Minimum trailing run for the poly-tail merge (0 disables).
    pub poly_tail_min_length: usize,
    /// Maximum combined end distance for the platform collapse (0 disables).
    pub collapse_distance: i64,
}

impl Default for GroupBuilderConfig {
    fn default() -> Self {
        Self {
            umi_enabled: true,
            duplex_enabled: false,
            duplex_delimiter: '-',
            permitted_base_diff: 1,
            imbalance_ratio: 10,
            imbalance_base_diff: 3,
            jitter_distance: 3,
            jitter_umi_edits: 0,
            poly_tail_min_length: 2,
            collapse_distance: 0,
        }
    }
}

/// Counters describing the merges performed by one builder.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuilderStats {
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
    /// Reads that failed to resolve against a defined UMI allow-list.
    pub unresolved_defined_umis: u64,
}

/// Builds UMI-aware duplicate groups from coordinate-resolved batches.
pub struct DuplicateGroupBuilder {
    config: GroupBuilderConfig,
    umi_builder: Option<UmiGroupBuilder>,
    stats: BuilderStats,
}

impl DuplicateGroupBuilder {
    /// Creates a builder; `defined` supplies the optional UMI allow-list.
    #[must_use]
    pub fn new(config: GroupBuilderConfig, defined: Option<crate::umi::DefinedUmis>) -> Self {
        let umi_builder = config.umi_enabled.then(|| {
            UmiGroupBuilder::new(UmiGrouperConfig {
                permitted_base_diff: config.permitted_base_diff,
                imbalance_ratio: config.imbalance_ratio,
                imbalance_base_diff: config.imbalance_base_diff,
                defined,
            })
        });
        Self { config, umi_builder, stats: BuilderStats::default() }
    }

    /// The merge counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> BuilderStats {
        let mut stats = self.stats;
        if let Some(umi_builder) = &self.umi_builder {
            stats.umi_merges = umi_builder.merges();
            stats.unresolved_defined_umis = umi_builder.unresolved_defined();
        }
        stats
    }

    /// Processes one coordinate-resolved batch into final fragments.
    pub fn build(&mut self, batch: FragmentCoordReads) -> Vec<Fragment> {
        let mut fragments = match &mut self.umi_builder {
            None => batch.into_fragments(),
            Some(umi_builder) => {
                // Re-bucket all reads by the UMI-agnostic coordinate key and
                // cluster each bucket by UMI.
                let mut by_coordinate: AHashMap<FragmentCoords, Vec<ReadInfo>> = AHashMap::new();
                for group in batch.duplicate_groups {
                    let coordinates = group.coordinates.clone();
                    for read in group.reads.into_iter().chain(group.non_consensus_reads) {
                        by_coordinate
                            .entry(coordinates.without_umi())
                            .or_default()
                            .push(ReadInfo::new(read, coordinates.clone()));
                    }
                }
                for info in batch.singles {
                    by_coordinate.entry(info.coordinates.without_umi()).or_default().push(info);
                }

                let mut fragments = Vec::new();
                for (_, reads) in by_coordinate {
                    fragments.extend(umi_builder.group_reads(reads));
                }
                fragments
            }
        };

        if self.config.umi_enabled {
            if self.config.duplex_enabled {
                let before = Self::dual_strand_count(&fragments);
                fragments = duplex_merge(
                    fragments,
                    self.config.duplex_delimiter,
                    self.config.permitted_base_diff,
                );
                self.stats.duplex_groups += Self::dual_strand_count(&fragments) - before;
            }

            let before = fragments.len() as u64;
            fragments = jitter_merge(
                fragments,
                self.config.jitter_distance,
                self.config.jitter_umi_edits,
                self.config.duplex_delimiter,
            );
            self.stats.jitter_merges += before - fragments.len() as u64;

            if self.config.duplex_enabled {
                let before = fragments.len() as u64;
                fragments = poly_tail_merge(fragments, self.config.poly_tail_min_length);
                self.stats.poly_tail_merges += before - fragments.len() as u64;
            }
        }

        let before = fragments.len() as u64;
        fragments = distance_collapse(fragments, self.config.collapse_distance);
        self.stats.distance_merges += before - fragments.len() as u64;

        // Demote singleton groups and pick each group's representative.
        fragments
            .into_iter()
            .map(|fragment| {
                let mut fragment = fragment.normalized();
                if let Fragment::Group(group) = &mut fragment {
                    group.select_primary();
                }
                fragment
            })
            .collect()
    }

    fn dual_strand_count(fragments: &[Fragment]) -> u64 {
        fragments
            .iter()
            .filter(|f| matches!(f, Fragment::Group(g) if g.dual_strand))
            .count() as u64
    }
}
