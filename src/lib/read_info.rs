//! Data model for duplicate grouping.
//!
//! - [`ReadInfo`]: a single read awaiting possible grouping
//! - [`DuplicateGroup`]: a cluster of reads representing one source molecule
//! - [`Fragment`]: sum type over the two, used by the merge passes so a pass
//!   can treat singles and groups uniformly without runtime type tests

use noodles::sam::alignment::RecordBuf;

use crate::fragment_coords::FragmentCoords;
use crate::sam::record_utils::mean_base_quality;

/// A single read with its derived fragment coordinates.
///
/// Immutable once created; ownership transfers between cache structures as
/// the read is grouped or evicted.
#[derive(Debug)]
pub struct ReadInfo {
    /// The underlying alignment record.
    pub read: RecordBuf,
    /// The derived duplicate key.
    pub coordinates: FragmentCoords,
}

impl ReadInfo {
    /// Creates a new `ReadInfo`.
    #[must_use]
    pub fn new(read: RecordBuf, coordinates: FragmentCoords) -> Self {
        Self { read, coordinates }
    }

    /// The extracted UMI, if any.
    #[must_use]
    pub fn umi(&self) -> Option<&str> {
        self.coordinates.umi.as_deref()
    }
}

/// A cluster of reads identified as duplicates of one source molecule.
///
/// `reads` holds consensus-eligible members; `non_consensus_reads` holds
/// members that still count as duplicates but must not feed consensus
/// building (jitter-shifted or poly-tail-unmapped reads whose positions
/// carry no independent evidence).
#[derive(Debug, Default)]
pub struct DuplicateGroup {
    /// Canonical UMI for the group (the dominant bucket's UMI), if any.
    pub umi: Option<String>,
    /// Canonical coordinates for the group.
    pub coordinates: FragmentCoords,
    /// Consensus-eligible reads.
    pub reads: Vec<RecordBuf>,
    /// Reads merged in but excluded from consensus input.
    pub non_consensus_reads: Vec<RecordBuf>,
    /// Whether both strands of the source molecule are represented.
    pub dual_strand: bool,
    /// Index into `reads` of the representative read, set by
    /// [`DuplicateGroup::select_primary`].
    primary_index: Option<usize>,
    /// Consensus read built by the external consensus collaborator.
    pub consensus_read: Option<RecordBuf>,
}

impl DuplicateGroup {
    /// Creates a group from reads sharing the given coordinates.
    #[must_use]
    pub fn new(coordinates: FragmentCoords, reads: Vec<RecordBuf>) -> Self {
        Self {
            umi: coordinates.umi.clone(),
            coordinates,
            reads,
            non_consensus_reads: Vec::new(),
            dual_strand: false,
            primary_index: None,
            consensus_read: None,
        }
    }

    /// Total number of reads represented by this group.
    #[must_use]
    pub fn total_read_count(&self) -> usize {
        self.reads.len() + self.non_consensus_reads.len()
    }

    /// Selects the representative read: the consensus-eligible read with the
    /// highest mean base quality. Used for downstream tie-breaking.
    pub fn select_primary(&mut self) {
        let mut best: Option<(usize, f64)> = None;
        for (i, read) in self.reads.iter().enumerate() {
            let quality = mean_base_quality(read);
            match best {
                Some((_, best_quality)) if quality <= best_quality => {}
                _ => best = Some((i, quality)),
            }
        }
        self.primary_index = best.map(|(i, _)| i);
    }

    /// The representative read, if one has been selected.
    #[must_use]
    pub fn primary_read(&self) -> Option<&RecordBuf> {
        self.primary_index.and_then(|i| self.reads.get(i))
    }

    /// Absorbs another fragment into this group.
    ///
    /// When `consensus_eligible` is false the absorbed reads are kept as
    /// duplicates but excluded from consensus input.
    pub fn absorb(&mut self, other: Fragment, consensus_eligible: bool) {
        match other {
            Fragment::Single(info) => {
                if consensus_eligible {
                    self.reads.push(info.read);
                } else {
                    self.non_consensus_reads.push(info.read);
                }
            }
            Fragment::Group(group) => {
                if consensus_eligible {
                    self.reads.extend(group.reads);
                } else {
                    self.non_consensus_reads.extend(group.reads);
                }
                // Reads already excluded from consensus stay excluded.
                self.non_consensus_reads.extend(group.non_consensus_reads);
                self.dual_strand |= group.dual_strand;
            }
        }
        // Membership changed; any previous selection is stale.
        self.primary_index = None;
    }

    /// Moves the read at `index` from the consensus-eligible set to the
    /// non-consensus set.
    pub fn demote_read(&mut self, index: usize) {
        if index < self.reads.len() {
            let read = self.reads.remove(index);
            self.non_consensus_reads.push(read);
            self.primary_index = None;
        }
    }

    /// Consumes the group into output records.
    ///
    /// Every read except the representative receives the SAM duplicate flag;
    /// with `remove_duplicates` the flagged reads are dropped instead.
    /// Returns the records to write plus (duplicate, dropped) counts.
    #[must_use]
    pub fn into_output_reads(mut self, remove_duplicates: bool) -> (Vec<RecordBuf>, u64, u64) {
        use noodles::sam::alignment::record::Flags;

        if self.primary_index.is_none() {
            self.select_primary();
        }
        let primary = self.primary_index.unwrap_or(0);

        let mut out = Vec::with_capacity(self.total_read_count());
        let mut duplicates = 0;
        let mut dropped = 0;

        for (i, mut read) in self.reads.into_iter().enumerate() {
            if i == primary {
                out.push(read);
                continue;
            }
            duplicates += 1;
            if remove_duplicates {
                dropped += 1;
            } else {
                *read.flags_mut() = read.flags() | Flags::DUPLICATE;
                out.push(read);
            }
        }
        for mut read in self.non_consensus_reads {
            duplicates += 1;
            if remove_duplicates {
                dropped += 1;
            } else {
                *read.flags_mut() = read.flags() | Flags::DUPLICATE;
                out.push(read);
            }
        }

        (out, duplicates, dropped)
    }
}

/// A single read or a duplicate group, with a uniform capability set.
#[derive(Debug)]
pub enum Fragment {
    /// An unmatched single read.
    Single(ReadInfo),
    /// A cluster of duplicate reads.
    Group(DuplicateGroup),
}

impl Fragment {
    /// The fragment's coordinates.
    #[must_use]
    pub fn coordinates(&self) -> &FragmentCoords {
        match self {
            Fragment::Single(info) => &info.coordinates,
            Fragment::Group(group) => &group.coordinates,
        }
    }

    /// The fragment's UMI, if any.
    #[must_use]
    pub fn umi(&self) -> Option<&str> {
        match self {
            Fragment::Single(info) => info.umi(),
            Fragment::Group(group) => group.umi.as_deref(),
        }
    }

    /// Total number of reads represented.
    #[must_use]
    pub fn total_read_count(&self) -> usize {
        match self {
            Fragment::Single(_) => 1,
            Fragment::Group(group) => group.total_read_count(),
        }
    }

    /// Converts this fragment into a group, promoting a single read.
    #[must_use]
    pub fn into_group(self) -> DuplicateGroup {
        match self {
            Fragment::Single(info) => {
                DuplicateGroup::new(info.coordinates, vec![info.read])
            }
            Fragment::Group(group) => group,
        }
    }

    /// Demotes a group holding a single read back to [`Fragment::Single`].
    ///
    /// A group with `total_read_count == 1` is semantically a single read and
    /// must not reach final output as a group.
    #[must_use]
    pub fn normalized(self) -> Fragment {
        match self {
            Fragment::Group(mut group) if group.total_read_count() == 1 => {
                let read = if group.reads.is_empty() {
                    group.non_consensus_reads.remove(0)
                } else {
                    group.reads.remove(0)
                };
                Fragment::Single(ReadInfo::new(read, group.coordinates))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment_coords::FragmentCoords;
    use crate::sam::builder::RecordBuilder;

    fn coords_at(position: i64, umi: Option<&str>) -> FragmentCoords {
        FragmentCoords {
            lower_reference: 0,
            lower_position: position,
            upper_reference: 0,
            upper_position: position + 100,
            umi: umi.map(String::from),
            ..FragmentCoords::default()
        }
    }

    fn read_with_quality(name: &str, quality: u8) -> RecordBuf {
        RecordBuilder::new()
            .name(name)
            .sequence("ACGT")
            .qualities(&[quality; 4])
            .alignment_start(100)
            .cigar("4M")
            .build()
    }

    #[test]
    fn test_total_read_count_includes_non_consensus() {
        let mut group =
            DuplicateGroup::new(coords_at(100, None), vec![read_with_quality("a", 30)]);
        group.non_consensus_reads.push(read_with_quality("b", 20));
        assert_eq!(group.total_read_count(), 2);
    }

    #[test]
    fn test_select_primary_highest_mean_quality() {
        let mut group = DuplicateGroup::new(
            coords_at(100, None),
            vec![
                read_with_quality("low", 10),
                read_with_quality("high", 40),
                read_with_quality("mid", 25),
            ],
        );
        group.select_primary();
        let primary = group.primary_read().unwrap();
        assert_eq!(primary.name().unwrap().to_vec(), b"high".to_vec());
    }

    #[test]
    fn test_absorb_single_consensus_eligible() {
        let mut group =
            DuplicateGroup::new(coords_at(100, None), vec![read_with_quality("a", 30)]);
        let single = Fragment::Single(ReadInfo::new(read_with_quality("b", 30), coords_at(100, None)));
        group.absorb(single, true);
        assert_eq!(group.reads.len(), 2);
        assert!(group.non_consensus_reads.is_empty());
    }

    #[test]
    fn test_absorb_group_non_eligible_keeps_exclusions() {
        let mut target =
            DuplicateGroup::new(coords_at(100, None), vec![read_with_quality("a", 30)]);
        let mut other =
            DuplicateGroup::new(coords_at(103, None), vec![read_with_quality("b", 30)]);
        other.non_consensus_reads.push(read_with_quality("c", 30));

        target.absorb(Fragment::Group(other), false);
        assert_eq!(target.reads.len(), 1);
        assert_eq!(target.non_consensus_reads.len(), 2);
        assert_eq!(target.total_read_count(), 3);
    }

    #[test]
    fn test_singleton_group_demoted() {
        let group = DuplicateGroup::new(coords_at(100, None), vec![read_with_quality("a", 30)]);
        let fragment = Fragment::Group(group).normalized();
        assert!(matches!(fragment, Fragment::Single(_)));
    }

    #[test]
    fn test_real_group_not_demoted() {
        let group = DuplicateGroup::new(
            coords_at(100, None),
            vec![read_with_quality("a", 30), read_with_quality("b", 30)],
        );
        let fragment = Fragment::Group(group).normalized();
        assert!(matches!(fragment, Fragment::Group(_)));
        assert_eq!(fragment.total_read_count(), 2);
    }

    #[test]
    fn test_into_output_reads_flags_all_but_primary() {
        use noodles::sam::alignment::record::Flags;

        let mut group = DuplicateGroup::new(
            coords_at(100, None),
            vec![read_with_quality("low", 10), read_with_quality("high", 40)],
        );
        group.non_consensus_reads.push(read_with_quality("shifted", 35));

        let (records, duplicates, dropped) = group.into_output_reads(false);
        assert_eq!(records.len(), 3);
        assert_eq!(duplicates, 2);
        assert_eq!(dropped, 0);

        for record in &records {
            let name = record.name().unwrap().to_vec();
            let flagged = record.flags().contains(Flags::DUPLICATE);
            assert_eq!(flagged, name != b"high".to_vec(), "read {name:?}");
        }
    }

    #[test]
    fn test_into_output_reads_remove_mode_drops_duplicates() {
        let group = DuplicateGroup::new(
            coords_at(100, None),
            vec![read_with_quality("a", 10), read_with_quality("b", 40)],
        );
        let (records, duplicates, dropped) = group.into_output_reads(true);
        assert_eq!(records.len(), 1);
        assert_eq!(duplicates, 1);
        assert_eq!(dropped, 1);
        assert_eq!(records[0].name().unwrap().to_vec(), b"b".to_vec());
    }

    #[test]
    fn test_promote_single_to_group() {
        let single = Fragment::Single(ReadInfo::new(
            read_with_quality("a", 30),
            coords_at(100, Some("ACGT")),
        ));
        let group = single.into_group();
        assert_eq!(group.reads.len(), 1);
        assert_eq!(group.umi.as_deref(), Some("ACGT"));
    }
}
