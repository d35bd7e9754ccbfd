//! Duplex-orientation merge pass.
//!
//! Fragments sharing the non-oriented coordinate key but carrying opposite
//! strand orientations are tested pairwise: when their UMIs form
//! complementary duplex halves, the pair merges into a single group flagged
//! `dual_strand`. Collapsing is strictly pairwise; a group participates in at
//! most one pairing.

use ahash::AHashMap;

use crate::fragment_coords::NonOrientedCoords;
use crate::read_info::Fragment;
use crate::umi::duplex_complement_match;

/// Returns true when the two keys sit on opposite strands of one molecule.
fn opposite_strands(a: &crate::fragment_coords::FragmentCoords, b: &crate::fragment_coords::FragmentCoords) -> bool {
    a.lower_orientation != b.lower_orientation
}

/// Merges duplex-strand counterpart fragments.
///
/// Pairing is order-independent: candidates are scanned in a canonical order
/// (UMI, then orientation), so grouping `(A, forward)` with `(B, reverse)`
/// yields the same result as the reverse presentation.
#[must_use]
pub fn duplex_merge(fragments: Vec<Fragment>, delimiter: char, tolerance: u32) -> Vec<Fragment> {
    let mut slots: Vec<Option<Fragment>> = fragments.into_iter().map(Some).collect();
    // Collapsing is strictly pairwise: once a fragment has paired it is out.
    let mut paired = vec![false; slots.len()];

    // Bucket candidate indices by the weaker non-oriented key.
    let mut buckets: AHashMap<NonOrientedCoords, Vec<usize>> = AHashMap::new();
    for (i, slot) in slots.iter().enumerate() {
        let fragment = slot.as_ref().expect("slot filled at construction");
        buckets.entry(fragment.coordinates().non_oriented()).or_default().push(i);
    }

    for indices in buckets.into_values() {
        if indices.len() < 2 {
            continue;
        }

        // Canonical scan order makes the pairing input-order independent.
        let mut ordered = indices;
        ordered.sort_by(|&a, &b| {
            let fa = slots[a].as_ref().expect("candidate slot filled");
            let fb = slots[b].as_ref().expect("candidate slot filled");
            fa.umi()
                .cmp(&fb.umi())
                .then_with(|| fa.coordinates().lower_orientation.cmp(&fb.coordinates().lower_orientation))
        });

        for i in 0..ordered.len() {
            if slots[ordered[i]].is_none() || paired[ordered[i]] {
                continue;
            }
            for j in (i + 1)..ordered.len() {
                if slots[ordered[j]].is_none() || paired[ordered[j]] {
                    continue;
                }

                let (matched, first_survives) = {
                    let a = slots[ordered[i]].as_ref().expect("checked above");
                    let b = slots[ordered[j]].as_ref().expect("checked above");
                    let matched = opposite_strands(a.coordinates(), b.coordinates())
                        && match (a.umi(), b.umi()) {
                            (Some(ua), Some(ub)) => {
                                duplex_complement_match(ua, ub, delimiter, tolerance)
                            }
                            _ => false,
                        };
                    // Survivor: the forward-lower ("top") strand fragment.
                    let first_survives = a.coordinates().lower_orientation
                        <= b.coordinates().lower_orientation;
                    (matched, first_survives)
                };

                if !matched {
                    continue;
                }

                let (survivor_idx, absorbed_idx) = if first_survives {
                    (ordered[i], ordered[j])
                } else {
                    (ordered[j], ordered[i])
                };
                let absorbed = slots[absorbed_idx].take().expect("checked above");
                let survivor = slots[survivor_idx].take().expect("checked above");

                let mut group = survivor.into_group();
                group.absorb(absorbed, true);
                group.dual_strand = true;
                slots[survivor_idx] = Some(Fragment::Group(group));
                paired[survivor_idx] = true;

                // Only one pairing per group.
                break;
            }
            // A fragment that just absorbed its counterpart stops pairing;
            // remaining candidates may still pair among themselves.
        }
    }

    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment_coords::{FragmentCoords, Orientation};
    use crate::read_info::ReadInfo;
    use crate::sam::builder::RecordBuilder;

    fn fragment(umi: &str, forward_lower: bool, name: &str) -> Fragment {
        let record = RecordBuilder::new()
            .name(name)
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .build();
        let coordinates = FragmentCoords {
            lower_reference: 0,
            lower_position: 100,
            lower_orientation: if forward_lower { Orientation::Forward } else { Orientation::Reverse },
            upper_reference: 0,
            upper_position: 300,
            upper_orientation: if forward_lower { Orientation::Reverse } else { Orientation::Forward },
            read_is_lower: forward_lower,
            umi: Some(umi.to_string()),
            ..FragmentCoords::default()
        };
        Fragment::Single(ReadInfo::new(record, coordinates))
    }

    #[test]
    fn test_duplex_counterparts_merge_dual_strand() {
        let fragments = vec![
            fragment("AAAA-CCCC", true, "top"),
            fragment("CCCC-AAAA", false, "bottom"),
        ];
        let merged = duplex_merge(fragments, '-', 0);
        assert_eq!(merged.len(), 1);
        match &merged[0] {
            Fragment::Group(group) => {
                assert!(group.dual_strand);
                assert_eq!(group.total_read_count(), 2);
                assert_eq!(group.reads.len(), 2); // both strands consensus-eligible
            }
            Fragment::Single(_) => panic!("expected a merged group"),
        }
    }

    #[test]
    fn test_duplex_symmetry_order_independent() {
        let forward_first = duplex_merge(
            vec![fragment("AAAA-CCCC", true, "t"), fragment("CCCC-AAAA", false, "b")],
            '-',
            0,
        );
        let reverse_first = duplex_merge(
            vec![fragment("CCCC-AAAA", false, "b"), fragment("AAAA-CCCC", true, "t")],
            '-',
            0,
        );

        assert_eq!(forward_first.len(), 1);
        assert_eq!(reverse_first.len(), 1);

        let names = |fragments: &[Fragment]| -> Vec<Vec<u8>> {
            match &fragments[0] {
                Fragment::Group(g) => {
                    let mut names: Vec<Vec<u8>> =
                        g.reads.iter().map(|r| r.name().unwrap().to_vec()).collect();
                    names.sort();
                    names
                }
                Fragment::Single(_) => panic!("expected group"),
            }
        };
        assert_eq!(names(&forward_first), names(&reverse_first));
        assert_eq!(forward_first[0].umi(), reverse_first[0].umi());
    }

    #[test]
    fn test_same_strand_never_merges() {
        let fragments =
            vec![fragment("AAAA-CCCC", true, "a"), fragment("CCCC-AAAA", true, "b")];
        let merged = duplex_merge(fragments, '-', 0);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_non_complementary_umis_stay_separate() {
        let fragments =
            vec![fragment("AAAA-CCCC", true, "a"), fragment("GGGG-TTTT", false, "b")];
        let merged = duplex_merge(fragments, '-', 0);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_only_one_pairing_per_group() {
        // One top strand with two possible bottom counterparts: exactly one
        // pairing happens, the other candidate stays unpaired.
        let fragments = vec![
            fragment("AAAA-CCCC", true, "top"),
            fragment("CCCC-AAAA", false, "bottom1"),
            fragment("CCCC-AAAA", false, "bottom2"),
        ];
        let merged = duplex_merge(fragments, '-', 0);
        assert_eq!(merged.len(), 2);
        let dual_count = merged
            .iter()
            .filter(|f| matches!(f, Fragment::Group(g) if g.dual_strand))
            .count();
        assert_eq!(dual_count, 1);
    }

    #[test]
    fn test_bare_half_matches_full_duplex() {
        // A bare top-strand half against a full duplex UMI:
        let fragments = vec![
            fragment("ACGTG", true, "fwd"),
            fragment("GGGGC_ACGTG", false, "rev"),
        ];
        let merged = duplex_merge(fragments, '_', 0);
        assert_eq!(merged.len(), 1);
        assert!(matches!(&merged[0], Fragment::Group(g) if g.dual_strand));
    }
}
