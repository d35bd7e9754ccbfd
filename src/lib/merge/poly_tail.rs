//! Poly-tail merge pass.
//!
//! With duplex UMIs, a read whose far end is unmapped is prone to having its
//! UMI tail decay into a run of one base (commonly all-G). Fragments whose
//! UMI ends in a run of at least the minimum tail length are matched on
//! their trimmed UMI: trimmed UMIs that prefix-match are merge candidates
//! when their lower-coordinate anchor matches exactly.
//!
//! Fragments with a genuinely mapped mate take precedence: once a merge
//! produces a group containing a mapped-mate read, unmapped-sourced siblings
//! are absorbed as poly-tail-unmapped members, counting as duplicates but
//! excluded from consensus since their missing end carries no independent
//! positional evidence.

use ahash::AHashMap;

use crate::merge::DisjointSet;
use crate::read_info::Fragment;

/// Trims a trailing single-base run of at least `min_tail_length`.
///
/// Returns the trimmed UMI and whether anything was trimmed.
#[must_use]
pub fn trim_poly_tail(umi: &str, min_tail_length: usize) -> (&str, bool) {
    let bytes = umi.as_bytes();
    let Some(&last) = bytes.last() else {
        return (umi, false);
    };

    let run = bytes.iter().rev().take_while(|&&b| b.eq_ignore_ascii_case(&last)).count();
    if min_tail_length > 0 && run >= min_tail_length {
        (&umi[..umi.len() - run], true)
    } else {
        (umi, false)
    }
}

/// Sort key giving "earliest/lowest coordinate" priority.
fn priority_key(fragment: &Fragment) -> (i64, i64, String) {
    let coords = fragment.coordinates();
    (coords.lower_position, coords.upper_position, fragment.umi().unwrap_or("").to_string())
}

/// Merges poly-tail-decayed fragments into their mapped siblings.
#[must_use]
pub fn poly_tail_merge(fragments: Vec<Fragment>, min_tail_length: usize) -> Vec<Fragment> {
    if min_tail_length == 0 {
        return fragments;
    }

    // Candidate pairs share an exact lower-coordinate anchor.
    let mut buckets: AHashMap<(i32, i64), Vec<usize>> = AHashMap::new();
    for (i, fragment) in fragments.iter().enumerate() {
        let coords = fragment.coordinates();
        buckets.entry((coords.lower_reference, coords.lower_position)).or_default().push(i);
    }

    let trimmed: Vec<Option<(String, bool)>> = fragments
        .iter()
        .map(|fragment| {
            fragment.umi().map(|umi| {
                let (stem, was_trimmed) = trim_poly_tail(umi, min_tail_length);
                (stem.to_string(), was_trimmed)
            })
        })
        .collect();

    let mut ds = DisjointSet::new(fragments.len());
    for indices in buckets.into_values() {
        for (slot_a, &i) in indices.iter().enumerate() {
            for &j in &indices[slot_a + 1..] {
                let (Some((stem_i, trimmed_i)), Some((stem_j, trimmed_j))) =
                    (&trimmed[i], &trimmed[j])
                else {
                    continue;
                };

                // At least one side must be an unmapped-sourced fragment whose
                // tail actually decayed.
                let decayed_i = *trimmed_i && fragments[i].coordinates().unmapped_sourced;
                let decayed_j = *trimmed_j && fragments[j].coordinates().unmapped_sourced;
                if !decayed_i && !decayed_j {
                    continue;
                }

                if stem_i.starts_with(stem_j.as_str()) || stem_j.starts_with(stem_i.as_str()) {
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

        let has_mapped = cluster.iter().any(|&i| {
            !slots[i].as_ref().expect("slot filled").coordinates().unmapped_sourced
        });

        // A mapped-mate fragment takes precedence as the survivor.
        let survivor_idx = cluster
            .iter()
            .copied()
            .min_by_key(|&i| {
                let fragment = slots[i].as_ref().expect("slot filled");
                (fragment.coordinates().unmapped_sourced, priority_key(fragment))
            })
            .expect("cluster is non-empty");

        let survivor = slots[survivor_idx].take().expect("slot filled");
        let mut group = survivor.into_group();
        for index in cluster {
            if index == survivor_idx {
                continue;
            }
            let absorbed = slots[index].take().expect("slot filled");
            // Unmapped-sourced siblings of a mapped fragment are
            // poly-tail-unmapped: duplicates, but not consensus input.
            let eligible = !(has_mapped && absorbed.coordinates().unmapped_sourced);
            group.absorb(absorbed, eligible);
        }
        merged.push(Fragment::Group(group));
    }

    merged
}
