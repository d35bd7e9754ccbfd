//! Integration tests for fgdup.
//!
//! Run with: `cargo test --test integration_tests`
//!
//! These tests validate end-to-end workflows spanning multiple modules:
//! cache eviction, UMI clustering, the fuzzy merge passes, and BAM I/O.

use fgdup_lib::fragment_coords::FragmentCoords;
use fgdup_lib::group_builder::{DuplicateGroupBuilder, GroupBuilderConfig};
use fgdup_lib::merge::{duplex_merge, poly_tail_merge};
use fgdup_lib::read_cache::ReadCache;
use fgdup_lib::read_info::{Fragment, ReadInfo};
use fgdup_lib::sam::builder::RecordBuilder;
use fgdup_lib::umi::UmiExtractor;

/// Builds a mapped single-end read whose UMI rides in the read name.
fn read_with_umi(name_prefix: &str, start: usize, umi: &str) -> ReadInfo {
    let name = format!("{name_prefix}:{umi}");
    let record = RecordBuilder::new()
        .name(&name)
        .sequence("ACGTACGTAC")
        .alignment_start(start)
        .cigar("10M")
        .build();

    let mut extractor = UmiExtractor::new(':');
    let umi = extractor.extract(&name);
    let coordinates = FragmentCoords::from_read(&record, umi);
    ReadInfo::new(record, coordinates)
}

/// Streams reads through a cache and collects every emitted batch through a
/// group builder, mimicking one partition's Slicing and Draining phases.
fn collapse(reads: Vec<ReadInfo>, config: GroupBuilderConfig) -> Vec<Fragment> {
    let mut cache = ReadCache::new(300, 150);
    let mut builder = DuplicateGroupBuilder::new(config, None);

    let mut fragments = Vec::new();
    for info in reads {
        cache.process_read(info);
        let batch = cache.pop_reads();
        if !batch.is_empty() {
            fragments.extend(builder.build(batch));
        }
    }
    let batch = cache.evict_all();
    if !batch.is_empty() {
        fragments.extend(builder.build(batch));
    }
    fragments
}

#[test]
fn test_umi_mismatch_scenario_end_to_end() {
    // Two reads, identical position/orientation, UMIs at Hamming distance 1
    // with permitted_base_diff = 1: one merged group of two reads.
    let reads = vec![
        read_with_umi("a", 100, "AAAAA"),
        read_with_umi("b", 100, "AAAAT"),
    ];
    let fragments = collapse(reads, GroupBuilderConfig::default());

    assert_eq!(fragments.len(), 1);
    match &fragments[0] {
        Fragment::Group(group) => {
            assert_eq!(group.total_read_count(), 2);
            assert!(group.primary_read().is_some());
        }
        Fragment::Single(_) => panic!("expected a merged group"),
    }
}

#[test]
fn test_no_data_loss_over_streamed_input() {
    // A long coordinate-sorted stream with a mix of duplicates and singles:
    // every read fed to the cache comes back out exactly once.
    let mut reads = Vec::new();
    for i in 0..200usize {
        let start = 100 + i * 13;
        reads.push(read_with_umi("a", start, "AAAAA"));
        if i % 3 == 0 {
            reads.push(read_with_umi("b", start, "AAAAA")); // duplicate
        }
        if i % 7 == 0 {
            reads.push(read_with_umi("c", start, "GGGGG")); // distinct molecule
        }
    }
    let input_count = reads.len();

    let fragments = collapse(reads, GroupBuilderConfig::default());
    let output_count: usize = fragments.iter().map(Fragment::total_read_count).sum();
    assert_eq!(input_count, output_count);
}

#[test]
fn test_coordinate_partition_correctness() {
    // Reads with different coordinates never share a raw group, even with
    // identical UMIs; fuzzy passes disabled to observe the raw partition.
    let config = GroupBuilderConfig {
        jitter_distance: 0,
        poly_tail_min_length: 0,
        ..GroupBuilderConfig::default()
    };
    let reads = vec![
        read_with_umi("a", 100, "AAAAA"),
        read_with_umi("b", 100, "AAAAA"),
        read_with_umi("c", 500, "AAAAA"),
    ];
    let fragments = collapse(reads, config);

    assert_eq!(fragments.len(), 2);
    let group_count =
        fragments.iter().filter(|f| matches!(f, Fragment::Group(_))).count();
    assert_eq!(group_count, 1);
}

#[test]
fn test_duplex_scenario_end_to_end() {
    // "ACGTG" forward vs "GGGGC_ACGTG" reverse at the same
    // non-oriented coordinate merge into a dual-strand group.
    let top = {
        let record = RecordBuilder::new()
            .name("top:ACGTG")
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .build();
        let coordinates = FragmentCoords::from_read(&record, Some("ACGTG".to_string()));
        Fragment::Single(ReadInfo::new(record, coordinates))
    };
    let bottom = {
        // Reverse read whose unclipped 5' end (91 + 10 - 1) meets the top
        // strand's anchor at 100.
        let record = RecordBuilder::new()
            .name("bottom:GGGGC_ACGTG")
            .sequence("ACGTACGTAC")
            .alignment_start(91)
            .cigar("10M")
            .reverse_complement(true)
            .build();
        let coordinates =
            FragmentCoords::from_read(&record, Some("GGGGC_ACGTG".to_string()));
        Fragment::Single(ReadInfo::new(record, coordinates))
    };

    let merged = duplex_merge(vec![top, bottom], '_', 0);
    assert_eq!(merged.len(), 1);
    match &merged[0] {
        Fragment::Group(group) => {
            assert!(group.dual_strand);
            assert_eq!(group.total_read_count(), 2);
        }
        Fragment::Single(_) => panic!("expected dual-strand group"),
    }
}

#[test]
fn test_poly_tail_scenario_end_to_end() {
    // UMI "AACGG" with an unmapped mate trims to "AAC"; a
    // mapped fragment sharing the anchor and trimmed UMI absorbs it as a
    // poly-tail-unmapped (non-consensus) member.
    let mapped = {
        let record = RecordBuilder::new()
            .name("mapped:AACTT")
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .mate_alignment_start(300)
            .mate_cigar("10M")
            .mate_reverse_complement(true)
            .build();
        let coordinates = FragmentCoords::from_read(&record, Some("AACTT".to_string()));
        Fragment::Single(ReadInfo::new(record, coordinates))
    };
    let decayed = {
        let record = RecordBuilder::new()
            .name("decayed:AACGG")
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .paired(true)
            .mate_unmapped(true)
            .build();
        let coordinates = FragmentCoords::from_read(&record, Some("AACGG".to_string()));
        Fragment::Single(ReadInfo::new(record, coordinates))
    };

    let merged = poly_tail_merge(vec![mapped, decayed], 2);
    assert_eq!(merged.len(), 1);
    match &merged[0] {
        Fragment::Group(group) => {
            assert_eq!(group.total_read_count(), 2);
            assert_eq!(group.non_consensus_reads.len(), 1);
            assert!(!group.coordinates.unmapped_sourced);
        }
        Fragment::Single(_) => panic!("expected merged group"),
    }
}

#[test]
fn test_jitter_scenario_respects_bound() {
    // Same UMI, one end shifted by 2 (within the default jitter distance of
    // 3): merged. Shifted by 5: never merged.
    let near = collapse(
        vec![read_with_umi("a", 100, "AAAAA"), read_with_umi("b", 102, "AAAAA")],
        GroupBuilderConfig::default(),
    );
    assert_eq!(near.len(), 1);

    let far = collapse(
        vec![read_with_umi("a", 100, "AAAAA"), read_with_umi("b", 105, "AAAAA")],
        GroupBuilderConfig::default(),
    );
    assert_eq!(far.len(), 2);
}

#[test]
fn test_bam_round_trip_preserves_records() {
    use fgdup_lib::bam_io::{create_bam_reader, create_bam_writer, finish_bam_writer};
    use noodles::sam::Header;
    use noodles::sam::alignment::io::Write as _;
    use noodles::sam::header::record::value::Map;
    use noodles::sam::header::record::value::map::ReferenceSequence;
    use std::num::NonZeroUsize;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reads.bam");

    let header = Header::builder()
        .add_reference_sequence(
            "chr1",
            Map::<ReferenceSequence>::new(NonZeroUsize::new(1_000_000).unwrap()),
        )
        .build();

    let mut writer = create_bam_writer(&path, &header).unwrap();
    for i in 0..10usize {
        let record = RecordBuilder::new()
            .name(&format!("read{i}:AAAAA"))
            .sequence("ACGTACGTAC")
            .alignment_start(100 + i * 50)
            .cigar("10M")
            .build();
        writer.write_alignment_record(&header, &record).unwrap();
    }
    finish_bam_writer(writer).unwrap();

    let (mut reader, read_header) = create_bam_reader(&path).unwrap();
    assert_eq!(read_header.reference_sequences().len(), 1);
    let count = reader.records().count();
    assert_eq!(count, 10);
}
