//! Jitter merge pass.
//!
//! Polymerase slippage can shift one apparent fragment end by a few bases
//! without changing the UMI or the other end. Fragments sharing the
//! chromosome/orientation signature are compared pairwise: a candidate pair
//! merges when exactly one end position differs by at most the jitter
//! distance while the other end matches exactly, and the UMIs agree within
//! the tight tolerance reserved for jitter (exact for same-strand pairs,
//! duplex-complementary for opposite-strand pairs).
//!
//! Merged-in reads become non-consensus members: they still count as
//! duplicates but their shifted positions must not distort the consensus.

use ahash::AHashMap;

use crate::fragment_coords::{FragmentCoords, Orientation};
use crate::merge::DisjointSet;
use crate::read_info::Fragment;
use crate::umi::{duplex_complement_match, within_mismatches};

/// Chromosome/orientation signature ignoring exact positions.
///
/// Orientations are canonicalized up to a whole-fragment strand flip so that
/// duplex counterparts land in the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JitterKey {
    lower_reference: i32,
    upper_reference: i32,
    canonical_lower: Orientation,
    canonical_upper: Orientation,
    unpaired: bool,
    unmapped_sourced: bool,
    supplementary: bool,
}

impl JitterKey {
    fn of(coords: &FragmentCoords) -> Self {
        // Flip the whole pair when the lower end is reverse, so that a
        // fragment and its strand-flipped counterpart share one signature.
        let (canonical_lower, canonical_upper) = match coords.lower_orientation {
            Orientation::Forward => (coords.lower_orientation, coords.upper_orientation),
            Orientation::Reverse => {
                (coords.lower_orientation.flipped(), coords.upper_orientation.flipped())
            }
        };
        Self {
            lower_reference: coords.lower_reference,
            upper_reference: coords.upper_reference,
            canonical_lower,
            canonical_upper,
            unpaired: coords.unpaired,
            unmapped_sourced: coords.unmapped_sourced,
            supplementary: coords.supplementary_info.is_some(),
        }
    }
}

/// True when the orientations agree end-for-end.
fn same_strand(a: &FragmentCoords, b: &FragmentCoords) -> bool {
    a.lower_orientation == b.lower_orientation && a.upper_orientation == b.upper_orientation
}

/// True when the orientations are a whole-fragment strand flip apart.
fn opposite_strand(a: &FragmentCoords, b: &FragmentCoords) -> bool {
    a.lower_orientation == b.lower_orientation.flipped()
        && a.upper_orientation == b.upper_orientation.flipped()
}

/// Tests the positional jitter condition: exactly one end moved, by no more
/// than `jitter_distance`, while the other end matches exactly.
fn positions_jitter_compatible(a: &FragmentCoords, b: &FragmentCoords, jitter_distance: i64) -> bool {
    let lower_delta = (a.lower_position - b.lower_position).abs();
    let upper_delta = if a.upper_position == b.upper_position {
        0
    } else {
        (a.upper_position - b.upper_position).abs()
    };

    match (lower_delta == 0, upper_delta == 0) {
        (true, true) | (false, false) => false, // zero or both ends moved
        (true, false) => upper_delta <= jitter_distance,
        (false, true) => lower_delta <= jitter_distance,
    }
}

/// Tests the UMI condition for a jitter candidate pair.
fn umis_jitter_compatible(
    a: &Fragment,
    b: &Fragment,
    tolerance: u32,
    duplex_delimiter: char,
) -> bool {
    match (a.umi(), b.umi()) {
        (None, None) => true, // UMI-less data: position evidence alone
        (Some(ua), Some(ub)) => {
            if same_strand(a.coordinates(), b.coordinates()) {
                within_mismatches(ua, ub, tolerance)
            } else {
                duplex_complement_match(ua, ub, duplex_delimiter, tolerance)
            }
        }
        _ => false,
    }
}

/// Sort key giving "earliest/lowest coordinate" priority.
fn priority_key(fragment: &Fragment) -> (i64, i64, String) {
    let coords = fragment.coordinates();
    (
        coords.lower_position,
        coords.upper_position,
        fragment.umi().unwrap_or("").to_string(),
    )
}

/// Merges jitter-shifted fragments.
///
/// Candidate pairs are accumulated into clusters with a disjoint-set; each
/// cluster keeps its earliest/lowest-coordinate member as the survivor and
/// absorbs the rest as non-consensus duplicates. Singles that gain members
/// are promoted to groups.
#[must_use]
pub fn jitter_merge(
    fragments: Vec<Fragment>,
    jitter_distance: i64,
    umi_tolerance: u32,
    duplex_delimiter: char,
) -> Vec<Fragment> {
    if jitter_distance <= 0 {
        return fragments;
    }

    let mut buckets: AHashMap<JitterKey, Vec<usize>> = AHashMap::new();
    for (i, fragment) in fragments.iter().enumerate() {
        buckets.entry(JitterKey::of(fragment.coordinates())).or_default().push(i);
    }

    let mut ds = DisjointSet::new(fragments.len());
    for indices in buckets.into_values() {
        for (slot_a, &i) in indices.iter().enumerate() {
            for &j in &indices[slot_a + 1..] {
                let a = &fragments[i];
                let b = &fragments[j];
                let strands_agree = same_strand(a.coordinates(), b.coordinates())
                    || opposite_strand(a.coordinates(), b.coordinates());
                if strands_agree
                    && positions_jitter_compatible(a.coordinates(), b.coordinates(), jitter_distance)
                    && umis_jitter_compatible(a, b, umi_tolerance, duplex_delimiter)
                {
                    ds.union(i, j);
                }
            }
        }
    }

    let mut slots: Vec<Option<Fragment>> = fragments.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(slots.len());

    for cluster in ds.clusters() {
        if cluster.len() == 1 {
            merged.push(slots[cluster[0]].take().expect("slot filled"));
            continue;
        }

        // Earliest/lowest coordinate survives regardless of input order.
        let survivor_idx = cluster
            .iter()
            .copied()
            .min_by_key(|&i| priority_key(slots[i].as_ref().expect("slot filled")))
            .expect("cluster is non-empty");

        let survivor = slots[survivor_idx].take().expect("slot filled");
        let mut group = survivor.into_group();
        for index in cluster {
            if index != survivor_idx {
                let absorbed = slots[index].take().expect("slot filled");
                group.absorb(absorbed, false);
            }
        }
        merged.push(Fragment::Group(group));
    }

    merged
}
