//! Canonical fragment coordinates derived from a read and its mate.
//!
//! A [`FragmentCoords`] is the 5' genomic signature of the sequenced fragment:
//! the unclipped 5' positions and orientations of both ends, normalized so
//! that "lower"/"upper" follow genomic order rather than read-in-pair order.
//! Two reads are duplicate-coordinate-equal iff their keys compare equal.
//!
//! The key is a pure function of the read plus mate metadata (MC tag when
//! available, raw mate position otherwise) and never depends on processing
//! order.

use noodles::sam::alignment::RecordBuf;

use crate::sam::record_utils::{
    mate_unclipped_five_prime_position, unclipped_five_prime_position,
};

/// Sentinel for a genomic position that is not available (e.g. unmapped mate).
pub const NO_POSITION: i64 = i64::MIN;

/// Sentinel for a reference sequence that is not available.
pub const NO_REFERENCE: i32 = -1;

/// Strand orientation of one fragment end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Orientation {
    /// Read aligned to the forward strand; 5' end is the unclipped start.
    Forward,
    /// Read aligned to the reverse strand; 5' end is the unclipped end.
    Reverse,
}

impl Orientation {
    /// Returns the opposite orientation.
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Reverse,
            Orientation::Reverse => Orientation::Forward,
        }
    }
}

/// Signature of a supplementary alignment, kept so supplementaries are never
/// silently merged with primary alignments sharing the same fragment ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SupplementaryInfo {
    /// The supplementary alignment's own 5' unclipped position.
    pub position: i64,
    /// The supplementary alignment's orientation.
    pub orientation: Orientation,
}

/// Canonical duplicate key for a read/mate pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentCoords {
    /// Reference sequence index of the genomically lower end.
    pub lower_reference: i32,
    /// Unclipped 5' position of the lower end ([`NO_POSITION`] when unknown).
    pub lower_position: i64,
    /// Orientation of the lower end.
    pub lower_orientation: Orientation,
    /// Reference sequence index of the genomically upper end.
    pub upper_reference: i32,
    /// Unclipped 5' position of the upper end ([`NO_POSITION`] when unknown).
    pub upper_position: i64,
    /// Orientation of the upper end.
    pub upper_orientation: Orientation,
    /// Whether the read this key was derived from is the lower end.
    pub read_is_lower: bool,
    /// The read is not part of a pair.
    pub unpaired: bool,
    /// The fragment has an unmapped end (unpaired reads excluded).
    pub unmapped_sourced: bool,
    /// Present when the read is a supplementary alignment.
    pub supplementary_info: Option<SupplementaryInfo>,
    /// Extracted UMI, when UMI handling is enabled.
    pub umi: Option<String>,
}

impl Default for FragmentCoords {
    /// A key with no known positions; used as a placeholder in tests and for
    /// group construction before coordinates are assigned.
    fn default() -> Self {
        Self {
            lower_reference: NO_REFERENCE,
            lower_position: NO_POSITION,
            lower_orientation: Orientation::Forward,
            upper_reference: NO_REFERENCE,
            upper_position: NO_POSITION,
            upper_orientation: Orientation::Reverse,
            read_is_lower: true,
            unpaired: false,
            unmapped_sourced: false,
            supplementary_info: None,
            umi: None,
        }
    }
}

/// The weaker, non-oriented coordinate key used to find duplex-strand
/// counterparts: drops which end is "lower" and both fine orientations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonOrientedCoords {
    /// Reference index of the lower end.
    pub lower_reference: i32,
    /// Position of the lower end.
    pub lower_position: i64,
    /// Reference index of the upper end.
    pub upper_reference: i32,
    /// Position of the upper end.
    pub upper_position: i64,
    /// The read is not part of a pair.
    pub unpaired: bool,
    /// The fragment has an unmapped end.
    pub unmapped_sourced: bool,
    /// Whether the source read was a supplementary alignment.
    pub supplementary: bool,
}

impl FragmentCoords {
    /// Derives the fragment coordinates for a mapped read.
    ///
    /// Resolves the 5' unclipped position and orientation for both ends of
    /// the pair, using the mate's CIGAR (MC tag) when available and the raw
    /// mate position otherwise. Always succeeds; missing mate information is
    /// represented with [`NO_POSITION`].
    #[must_use]
    pub fn from_read(record: &RecordBuf, umi: Option<String>) -> Self {
        let flags = record.flags();

        let read_reference = record.reference_sequence_id().map_or(NO_REFERENCE, |id| id as i32);
        let read_position = unclipped_five_prime_position(record).unwrap_or(NO_POSITION);
        let read_orientation = if flags.is_reverse_complemented() {
            Orientation::Reverse
        } else {
            Orientation::Forward
        };

        let supplementary_info = if flags.is_supplementary() {
            Some(SupplementaryInfo { position: read_position, orientation: read_orientation })
        } else {
            None
        };

        let unpaired = !flags.is_segmented();
        let mate_mapped = flags.is_segmented() && !flags.is_mate_unmapped();

        if unpaired || !mate_mapped {
            // Single known end; the read anchors the fragment by convention.
            return Self {
                lower_reference: read_reference,
                lower_position: read_position,
                lower_orientation: read_orientation,
                upper_reference: NO_REFERENCE,
                upper_position: NO_POSITION,
                upper_orientation: read_orientation.flipped(),
                read_is_lower: true,
                unpaired,
                unmapped_sourced: !unpaired,
                supplementary_info,
                umi,
            };
        }

        let mate_reference =
            record.mate_reference_sequence_id().map_or(NO_REFERENCE, |id| id as i32);
        let mate_orientation = if flags.is_mate_reverse_complemented() {
            Orientation::Reverse
        } else {
            Orientation::Forward
        };
        // Unclipped 5' via the MC tag when present; raw mate start otherwise.
        let mate_position = mate_unclipped_five_prime_position(record).unwrap_or_else(|| {
            record.mate_alignment_start().map_or(NO_POSITION, |p| usize::from(p) as i64)
        });

        let read_is_lower = (read_reference, read_position, read_orientation)
            <= (mate_reference, mate_position, mate_orientation);

        if read_is_lower {
            Self {
                lower_reference: read_reference,
                lower_position: read_position,
                lower_orientation: read_orientation,
                upper_reference: mate_reference,
                upper_position: mate_position,
                upper_orientation: mate_orientation,
                read_is_lower: true,
                unpaired: false,
                unmapped_sourced: false,
                supplementary_info,
                umi,
            }
        } else {
            Self {
                lower_reference: mate_reference,
                lower_position: mate_position,
                lower_orientation: mate_orientation,
                upper_reference: read_reference,
                upper_position: read_position,
                upper_orientation: read_orientation,
                read_is_lower: false,
                unpaired: false,
                unmapped_sourced: false,
                supplementary_info,
                umi,
            }
        }
    }

    /// Returns this key with the UMI stripped, for coordinate-only grouping.
    #[must_use]
    pub fn without_umi(&self) -> Self {
        Self { umi: None, ..self.clone() }
    }

    /// Returns the non-oriented key used to find duplex-strand counterparts.
    #[must_use]
    pub fn non_oriented(&self) -> NonOrientedCoords {
        NonOrientedCoords {
            lower_reference: self.lower_reference,
            lower_position: self.lower_position,
            upper_reference: self.upper_reference,
            upper_position: self.upper_position,
            unpaired: self.unpaired,
            unmapped_sourced: self.unmapped_sourced,
            supplementary: self.supplementary_info.is_some(),
        }
    }

    /// The reference index of the end this read anchors.
    #[must_use]
    pub fn anchor_reference(&self) -> i32 {
        if self.read_is_lower { self.lower_reference } else { self.upper_reference }
    }

    /// The position of the end this read anchors, used for cache bucketing.
    #[must_use]
    pub fn anchor_position(&self) -> i64 {
        if self.read_is_lower { self.lower_position } else { self.upper_position }
    }

    /// The orientation of the end this read anchors.
    ///
    /// Forward anchors are subject to soft-clip uncertainty ahead of the
    /// stream; reverse anchors are final once the stream passes them.
    #[must_use]
    pub fn anchor_orientation(&self) -> Orientation {
        if self.read_is_lower { self.lower_orientation } else { self.upper_orientation }
    }
}
