//! Record-level utilities for SAM/BAM records.
//!
//! Position helpers for duplicate grouping:
//! - CIGAR parsing and clip accounting
//! - Unclipped start/end and 5' positions for a read
//! - Mate unclipped positions derived from the MC tag
//! - Mean base quality scoring for representative-read selection

use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::Cigar as CigarTrait;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;

/// Parses a CIGAR string and returns it as a vector of (Kind, length) operations.
///
/// Used for the MC (mate CIGAR) tag value, which is only available as a string.
#[must_use]
pub fn parse_cigar_string(cigar_str: &str) -> Vec<(Kind, usize)> {
    let mut ops = Vec::new();
    let mut num_str = String::new();

    for ch in cigar_str.chars() {
        if ch.is_ascii_digit() {
            num_str.push(ch);
        } else {
            let len: usize = num_str.parse().unwrap_or(0);
            num_str.clear();

            let kind = match ch {
                'M' => Kind::Match,
                'I' => Kind::Insertion,
                'D' => Kind::Deletion,
                'N' => Kind::Skip,
                'S' => Kind::SoftClip,
                'H' => Kind::HardClip,
                'P' => Kind::Pad,
                '=' => Kind::SequenceMatch,
                'X' => Kind::SequenceMismatch,
                _ => continue,
            };

            if len > 0 {
                ops.push((kind, len));
            }
        }
    }

    ops
}

/// Calculates the reference length consumed by CIGAR operations.
#[must_use]
pub fn cigar_reference_length(ops: &[(Kind, usize)]) -> usize {
    ops.iter()
        .filter_map(|(kind, len)| match kind {
            Kind::Match
            | Kind::Deletion
            | Kind::Skip
            | Kind::SequenceMatch
            | Kind::SequenceMismatch => Some(*len),
            _ => None,
        })
        .sum()
}

/// Calculates leading clipping (soft + hard) from CIGAR operations.
#[must_use]
pub fn leading_clipping(ops: &[(Kind, usize)]) -> usize {
    ops.iter()
        .take_while(|(kind, _)| matches!(kind, Kind::SoftClip | Kind::HardClip))
        .map(|(_, len)| *len)
        .sum()
}

/// Calculates trailing clipping (soft + hard) from CIGAR operations.
#[must_use]
pub fn trailing_clipping(ops: &[(Kind, usize)]) -> usize {
    ops.iter()
        .rev()
        .take_while(|(kind, _)| matches!(kind, Kind::SoftClip | Kind::HardClip))
        .map(|(_, len)| *len)
        .sum()
}

/// Collects CIGAR operations from a record into a Vec for the clip helpers.
#[must_use]
fn cigar_to_ops(record: &RecordBuf) -> Vec<(Kind, usize)> {
    record.cigar().as_ref().iter().map(|op| (op.kind(), op.len())).collect()
}

/// Counts reference-consuming bases from a record's CIGAR.
#[must_use]
pub fn reference_length(cigar: &impl CigarTrait) -> usize {
    cigar
        .iter()
        .filter_map(std::result::Result::ok)
        .filter(|op| {
            matches!(
                op.kind(),
                Kind::Match
                    | Kind::Deletion
                    | Kind::Skip
                    | Kind::SequenceMatch
                    | Kind::SequenceMismatch
            )
        })
        .map(|op| op.len())
        .sum()
}

/// Gets the read's alignment end position (1-based, inclusive).
#[must_use]
pub fn alignment_end(record: &RecordBuf) -> Option<usize> {
    let start = usize::from(record.alignment_start()?);
    let ref_len = reference_length(&record.cigar());
    Some(start + ref_len.saturating_sub(1))
}

/// Gets the unclipped start position of a read (alignment start minus leading clips).
///
/// Includes both soft and hard clips, matching HTSJDK's `getUnclippedStart()`.
/// The result is signed: a long leading clip near the start of a reference can
/// place the unclipped start before position 1.
///
/// Returns `None` for unmapped reads.
#[must_use]
pub fn unclipped_start(record: &RecordBuf) -> Option<i64> {
    if record.flags().is_unmapped() {
        return None;
    }
    let start = usize::from(record.alignment_start()?) as i64;
    let leading = leading_clipping(&cigar_to_ops(record)) as i64;
    Some(start - leading)
}

/// Gets the unclipped end position of a read (alignment end plus trailing clips).
///
/// Includes both soft and hard clips, matching HTSJDK's `getUnclippedEnd()`.
///
/// Returns `None` for unmapped reads.
#[must_use]
pub fn unclipped_end(record: &RecordBuf) -> Option<i64> {
    if record.flags().is_unmapped() {
        return None;
    }
    let start = usize::from(record.alignment_start()?) as i64;
    let ref_len = reference_length(&record.cigar()) as i64;
    let trailing = trailing_clipping(&cigar_to_ops(record)) as i64;
    Some(start + (ref_len - 1).max(0) + trailing)
}

/// Gets the unclipped 5' position of a read.
///
/// For forward strand reads this is the unclipped start; for reverse strand
/// reads it is the unclipped end (the 5' end of the original molecule).
///
/// Returns `None` for unmapped reads.
#[must_use]
pub fn unclipped_five_prime_position(record: &RecordBuf) -> Option<i64> {
    if record.flags().is_unmapped() {
        return None;
    }
    if record.flags().is_reverse_complemented() {
        unclipped_end(record)
    } else {
        unclipped_start(record)
    }
}

/// Gets the mate's unclipped start position from the MC tag and mate position.
///
/// Calculates: `mate_start - leading_clipping(MC)`.
///
/// Returns `None` if the MC tag or mate position is missing.
#[must_use]
pub fn mate_unclipped_start(record: &RecordBuf) -> Option<i64> {
    let ops = mate_cigar_ops(record)?;
    let mate_start = usize::from(record.mate_alignment_start()?) as i64;
    Some(mate_start - leading_clipping(&ops) as i64)
}

/// Gets the mate's unclipped end position from the MC tag and mate position.
///
/// Calculates: `mate_start + ref_len(MC) - 1 + trailing_clipping(MC)`.
///
/// Returns `None` if the MC tag or mate position is missing.
#[must_use]
pub fn mate_unclipped_end(record: &RecordBuf) -> Option<i64> {
    let ops = mate_cigar_ops(record)?;
    let mate_start = usize::from(record.mate_alignment_start()?) as i64;
    let ref_len = cigar_reference_length(&ops) as i64;
    Some(mate_start + (ref_len - 1).max(0) + trailing_clipping(&ops) as i64)
}

/// Gets the mate's unclipped 5' position using the MC tag.
///
/// Forward mates anchor at their unclipped start, reverse mates at their
/// unclipped end. Returns `None` when the MC tag or mate position is missing;
/// callers fall back to the raw mate position in that case.
#[must_use]
pub fn mate_unclipped_five_prime_position(record: &RecordBuf) -> Option<i64> {
    if record.flags().is_mate_reverse_complemented() {
        mate_unclipped_end(record)
    } else {
        mate_unclipped_start(record)
    }
}

/// Parses the MC tag into CIGAR operations, if present.
fn mate_cigar_ops(record: &RecordBuf) -> Option<Vec<(Kind, usize)>> {
    let mc_tag = Tag::from([b'M', b'C']);
    let mc_value = record.data().get(&mc_tag)?;
    let cigar_str = match mc_value {
        Value::String(s) => String::from_utf8_lossy(s.as_ref()).to_string(),
        _ => return None,
    };
    let ops = parse_cigar_string(&cigar_str);
    if ops.is_empty() { None } else { Some(ops) }
}

/// Computes the mean base quality of a read.
///
/// Used to select the representative ("primary") read of a duplicate group.
/// Returns 0.0 for records with no quality scores.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_base_quality(record: &RecordBuf) -> f64 {
    let quals: &[u8] = record.quality_scores().as_ref();
    if quals.is_empty() {
        return 0.0;
    }
    let total: u64 = quals.iter().map(|&q| u64::from(q)).sum();
    total as f64 / quals.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::RecordBuilder;

    fn build_record(alignment_start: usize, cigar: &str, reverse: bool) -> RecordBuf {
        RecordBuilder::new()
            .sequence("ACGTACGTAC")
            .alignment_start(alignment_start)
            .cigar(cigar)
            .reverse_complement(reverse)
            .build()
    }

    #[test]
    fn test_parse_cigar_string() {
        let ops = parse_cigar_string("5S50M3I10M5H");
        assert_eq!(
            ops,
            vec![
                (Kind::SoftClip, 5),
                (Kind::Match, 50),
                (Kind::Insertion, 3),
                (Kind::Match, 10),
                (Kind::HardClip, 5),
            ]
        );
    }

    #[test]
    fn test_cigar_reference_length() {
        let ops = parse_cigar_string("5S50M3I10D10M5H");
        // 50M + 10D + 10M consume reference; S/I/H do not
        assert_eq!(cigar_reference_length(&ops), 70);
    }

    #[test]
    fn test_leading_and_trailing_clipping() {
        let ops = parse_cigar_string("10H5S50M3S2H");
        assert_eq!(leading_clipping(&ops), 15);
        assert_eq!(trailing_clipping(&ops), 5);
    }

    #[test]
    fn test_unclipped_start_forward() {
        // 5S at start: alignment_start=100, unclipped start = 95
        let record = build_record(100, "5S50M", false);
        assert_eq!(unclipped_start(&record), Some(95));
    }

    #[test]
    fn test_unclipped_start_hard_and_soft() {
        let record = build_record(100, "10H5S50M", false);
        assert_eq!(unclipped_start(&record), Some(85));
    }

    #[test]
    fn test_unclipped_end_reverse() {
        // 50M5S: alignment_end = 149, unclipped end = 154
        let record = build_record(100, "50M5S", true);
        assert_eq!(unclipped_end(&record), Some(154));
    }

    #[test]
    fn test_five_prime_position_by_strand() {
        let fwd = build_record(100, "5S50M", false);
        assert_eq!(unclipped_five_prime_position(&fwd), Some(95));

        let rev = build_record(100, "50M5S10H", true);
        assert_eq!(unclipped_five_prime_position(&rev), Some(164));
    }

    #[test]
    fn test_unclipped_start_can_go_negative() {
        // Alignment start of 3 with 10 leading soft clipped bases
        let record = build_record(3, "10S40M", false);
        assert_eq!(unclipped_start(&record), Some(-7));
    }

    #[test]
    fn test_mate_unclipped_positions_from_mc() {
        let record = RecordBuilder::new()
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .paired(true)
            .mate_alignment_start(200)
            .mate_cigar("5S45M10S")
            .build();

        assert_eq!(mate_unclipped_start(&record), Some(195));
        // 200 + 45 - 1 + 10 = 254
        assert_eq!(mate_unclipped_end(&record), Some(254));
    }

    #[test]
    fn test_mate_unclipped_missing_mc() {
        let record = build_record(100, "10M", false);
        assert_eq!(mate_unclipped_start(&record), None);
        assert_eq!(mate_unclipped_end(&record), None);
    }

    #[test]
    fn test_mean_base_quality() {
        let record = RecordBuilder::new()
            .sequence("ACGT")
            .qualities(&[10, 20, 30, 40])
            .alignment_start(1)
            .cigar("4M")
            .build();
        assert!((mean_base_quality(&record) - 25.0).abs() < f64::EPSILON);
    }
}
