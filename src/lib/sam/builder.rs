//! Builder for creating test SAM/BAM records.
//!
//! A fluent API for constructing records in tests, modeled after fgbio's
//! `SamBuilder`. Produces standalone [`RecordBuf`]s without header management.
//!
//! # Examples
//!
//! ```rust
//! use fgdup_lib::sam::builder::RecordBuilder;
//!
//! let record = RecordBuilder::new()
//!     .name("read1:ACGTT")
//!     .sequence("ACGTACGT")
//!     .alignment_start(100)
//!     .build();
//! ```

use bstr::BString;
use noodles::core::Position;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::cigar::Op;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value as BufValue;
use noodles::sam::alignment::record_buf::{QualityScores, Sequence};

/// Default base quality assigned when no qualities are given.
pub const DEFAULT_BASE_QUALITY: u8 = 30;

/// Default mapping quality for built records.
pub const DEFAULT_MAPQ: u8 = 60;

/// Parses a CIGAR string into noodles operations.
///
/// # Panics
/// Panics on malformed CIGAR strings; intended for test input only.
#[must_use]
pub fn parse_cigar(cigar_str: &str) -> Vec<Op> {
    let mut ops = Vec::new();
    let mut num_str = String::new();

    for c in cigar_str.chars() {
        if c.is_ascii_digit() {
            num_str.push(c);
        } else {
            let len: usize = num_str.parse().expect("Invalid CIGAR: expected number");
            let kind = match c {
                'M' => Kind::Match,
                'I' => Kind::Insertion,
                'D' => Kind::Deletion,
                'N' => Kind::Skip,
                'S' => Kind::SoftClip,
                'H' => Kind::HardClip,
                'P' => Kind::Pad,
                '=' => Kind::SequenceMatch,
                'X' => Kind::SequenceMismatch,
                _ => panic!("Unknown CIGAR operation: {c}"),
            };
            ops.push(Op::new(kind, len));
            num_str.clear();
        }
    }

    ops
}

/// Builder for a single [`RecordBuf`].
pub struct RecordBuilder {
    name: Option<Vec<u8>>,
    flags: Flags,
    reference_sequence_id: Option<usize>,
    alignment_start: Option<usize>,
    mapping_quality: Option<u8>,
    cigar: Option<String>,
    sequence: Vec<u8>,
    qualities: Vec<u8>,
    tags: Vec<(Tag, BufValue)>,
    mate_reference_sequence_id: Option<usize>,
    mate_alignment_start: Option<usize>,
    mate_cigar: Option<String>,
}

impl RecordBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            flags: Flags::empty(),
            reference_sequence_id: Some(0),
            alignment_start: None,
            mapping_quality: Some(DEFAULT_MAPQ),
            cigar: None,
            sequence: Vec::new(),
            qualities: Vec::new(),
            tags: Vec::new(),
            mate_reference_sequence_id: None,
            mate_alignment_start: None,
            mate_cigar: None,
        }
    }

    /// Sets the read name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.as_bytes().to_vec());
        self
    }

    /// Sets the sequence; qualities default to [`DEFAULT_BASE_QUALITY`].
    #[must_use]
    pub fn sequence(mut self, seq: &str) -> Self {
        self.sequence = seq.as_bytes().to_vec();
        if self.qualities.is_empty() {
            self.qualities = vec![DEFAULT_BASE_QUALITY; seq.len()];
        }
        self
    }

    /// Sets the quality scores.
    #[must_use]
    pub fn qualities(mut self, quals: &[u8]) -> Self {
        self.qualities = quals.to_vec();
        self
    }

    /// Sets all flags at once.
    #[must_use]
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the paired flag.
    #[must_use]
    pub fn paired(mut self, paired: bool) -> Self {
        self.flags.set(Flags::SEGMENTED, paired);
        self
    }

    /// Sets the first segment (R1) flag. Implies paired.
    #[must_use]
    pub fn first_segment(mut self, is_first: bool) -> Self {
        self.flags.set(Flags::SEGMENTED, true);
        self.flags.set(Flags::FIRST_SEGMENT, is_first);
        if !is_first {
            self.flags.set(Flags::LAST_SEGMENT, true);
        }
        self
    }

    /// Sets the unmapped flag.
    #[must_use]
    pub fn unmapped(mut self, unmapped: bool) -> Self {
        self.flags.set(Flags::UNMAPPED, unmapped);
        self
    }

    /// Sets the reverse complement flag.
    #[must_use]
    pub fn reverse_complement(mut self, reverse: bool) -> Self {
        self.flags.set(Flags::REVERSE_COMPLEMENTED, reverse);
        self
    }

    /// Sets the secondary alignment flag.
    #[must_use]
    pub fn secondary(mut self, secondary: bool) -> Self {
        self.flags.set(Flags::SECONDARY, secondary);
        self
    }

    /// Sets the supplementary alignment flag.
    #[must_use]
    pub fn supplementary(mut self, supplementary: bool) -> Self {
        self.flags.set(Flags::SUPPLEMENTARY, supplementary);
        self
    }

    /// Sets the reference sequence ID (0-based).
    #[must_use]
    pub fn reference_sequence_id(mut self, id: usize) -> Self {
        self.reference_sequence_id = Some(id);
        self
    }

    /// Sets the alignment start position (1-based).
    #[must_use]
    pub fn alignment_start(mut self, pos: usize) -> Self {
        self.alignment_start = Some(pos);
        self
    }

    /// Sets the mapping quality.
    #[must_use]
    pub fn mapping_quality(mut self, mapq: u8) -> Self {
        self.mapping_quality = Some(mapq);
        self
    }

    /// Sets the CIGAR string.
    #[must_use]
    pub fn cigar(mut self, cigar: &str) -> Self {
        self.cigar = Some(cigar.to_string());
        self
    }

    /// Sets the mate reference sequence ID (0-based). Implies paired.
    #[must_use]
    pub fn mate_reference_sequence_id(mut self, id: usize) -> Self {
        self.flags.set(Flags::SEGMENTED, true);
        self.mate_reference_sequence_id = Some(id);
        self
    }

    /// Sets the mate alignment start position (1-based). Implies paired.
    #[must_use]
    pub fn mate_alignment_start(mut self, pos: usize) -> Self {
        self.flags.set(Flags::SEGMENTED, true);
        self.mate_alignment_start = Some(pos);
        self
    }

    /// Sets the mate CIGAR, stored as the MC tag. Implies paired.
    #[must_use]
    pub fn mate_cigar(mut self, cigar: &str) -> Self {
        self.flags.set(Flags::SEGMENTED, true);
        self.mate_cigar = Some(cigar.to_string());
        self
    }

    /// Sets the mate reverse complement flag.
    #[must_use]
    pub fn mate_reverse_complement(mut self, reverse: bool) -> Self {
        self.flags.set(Flags::MATE_REVERSE_COMPLEMENTED, reverse);
        self
    }

    /// Sets the mate unmapped flag.
    #[must_use]
    pub fn mate_unmapped(mut self, unmapped: bool) -> Self {
        self.flags.set(Flags::MATE_UNMAPPED, unmapped);
        self
    }

    /// Adds a SAM tag.
    #[must_use]
    pub fn tag<V: Into<BufValue>>(mut self, tag: &str, value: V) -> Self {
        let tag_bytes = tag.as_bytes();
        if tag_bytes.len() == 2 {
            let tag = Tag::from([tag_bytes[0], tag_bytes[1]]);
            self.tags.push((tag, value.into()));
        }
        self
    }

    /// Builds the record.
    ///
    /// # Panics
    /// Panics if positions or mapping quality are out of range; intended for
    /// test input only.
    #[must_use]
    pub fn build(self) -> RecordBuf {
        let mut record = RecordBuf::default();

        if let Some(name) = self.name {
            *record.name_mut() = Some(BString::from(name));
        }

        let unmapped = self.alignment_start.is_none() || self.flags.is_unmapped();
        let mut flags = self.flags;
        if self.alignment_start.is_none() {
            flags.set(Flags::UNMAPPED, true);
        }
        *record.flags_mut() = flags;

        if !unmapped {
            if let Some(ref_id) = self.reference_sequence_id {
                *record.reference_sequence_id_mut() = Some(ref_id);
            }
            if let Some(pos) = self.alignment_start {
                *record.alignment_start_mut() =
                    Some(Position::try_from(pos).expect("alignment_start must be >= 1"));
            }
            if let Some(mapq) = self.mapping_quality {
                *record.mapping_quality_mut() = Some(
                    noodles::sam::alignment::record::MappingQuality::try_from(mapq)
                        .expect("mapping_quality must be valid"),
                );
            }
        }

        if let Some(mate_ref_id) = self.mate_reference_sequence_id {
            *record.mate_reference_sequence_id_mut() = Some(mate_ref_id);
        } else if self.mate_alignment_start.is_some() {
            // Default the mate to the read's own reference
            *record.mate_reference_sequence_id_mut() = self.reference_sequence_id;
        }
        if let Some(mate_pos) = self.mate_alignment_start {
            *record.mate_alignment_start_mut() =
                Some(Position::try_from(mate_pos).expect("mate_alignment_start must be >= 1"));
        }

        // CIGAR defaults to {len}M when a sequence is present
        let cigar_str = match (&self.cigar, self.sequence.is_empty()) {
            (Some(cigar), _) => cigar.clone(),
            (None, false) => format!("{}M", self.sequence.len()),
            (None, true) => String::new(),
        };
        if !cigar_str.is_empty() && !unmapped {
            let ops = parse_cigar(&cigar_str);
            *record.cigar_mut() = ops.into_iter().collect();
        }

        *record.sequence_mut() = Sequence::from(self.sequence);
        *record.quality_scores_mut() = QualityScores::from(self.qualities);

        if let Some(mc) = self.mate_cigar {
            record
                .data_mut()
                .insert(Tag::from([b'M', b'C']), BufValue::String(BString::from(mc)));
        }
        for (tag, value) in self.tags {
            record.data_mut().insert(tag, value);
        }

        record
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_minimal_mapped_record() {
        let record = RecordBuilder::new().sequence("ACGT").alignment_start(100).build();
        assert_eq!(usize::from(record.alignment_start().unwrap()), 100);
        assert_eq!(record.cigar().as_ref().len(), 1); // auto-generated 4M
        assert!(!record.flags().is_unmapped());
    }

    #[test]
    fn test_build_unmapped_record_without_start() {
        let record = RecordBuilder::new().sequence("ACGT").build();
        assert!(record.flags().is_unmapped());
        assert!(record.alignment_start().is_none());
    }

    #[test]
    fn test_mate_fields_imply_paired() {
        let record = RecordBuilder::new()
            .sequence("ACGT")
            .alignment_start(10)
            .mate_alignment_start(200)
            .mate_cigar("4M")
            .build();
        assert!(record.flags().is_segmented());
        assert_eq!(usize::from(record.mate_alignment_start().unwrap()), 200);
        assert_eq!(record.mate_reference_sequence_id(), Some(0));
        assert!(record.data().get(&Tag::from([b'M', b'C'])).is_some());
    }

    #[test]
    fn test_tag_round_trip() {
        let record = RecordBuilder::new()
            .sequence("ACGT")
            .alignment_start(1)
            .tag("MI", "42")
            .build();
        assert!(record.data().get(&Tag::from([b'M', b'I'])).is_some());
    }
}
