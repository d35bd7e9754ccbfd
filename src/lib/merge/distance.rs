//! Platform-distance collapse pass.
//!
//! Some platforms produce fragment ends that are imprecise by design. This
//! final pass collapses same-orientation fragments whose combined absolute
//! difference in lower- and upper-end positions is within a configured
//! maximum distance.
//!
//! The collapse is greedy on group size: at each step the candidate pair
//! whose merge yields the single largest resulting group is taken first, so
//! a large true duplicate family is not fragmented across several near-miss
//! sub-clusters. After a merge, supplementary reads whose own coordinates
//! fall outside the configured distance from the surviving template are
//! reclassified as non-consensus.

use ahash::AHashMap;

use crate::fragment_coords::{FragmentCoords, NO_POSITION, Orientation};
use crate::read_info::{DuplicateGroup, Fragment};
use crate::sam::record_utils::unclipped_five_prime_position;

/// Signature for same-orientation collapse candidates.
///
/// Supplementary fragments are deliberately not separated here: they may
/// collapse into the primary family, and the post-merge consistency check
/// reclassifies any whose own alignment disagrees with the template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DistanceKey {
    lower_reference: i32,
    upper_reference: i32,
    lower_orientation: Orientation,
    upper_orientation: Orientation,
    unpaired: bool,
    unmapped_sourced: bool,
}

impl DistanceKey {
    fn of(coords: &FragmentCoords) -> Self {
        Self {
            lower_reference: coords.lower_reference,
            upper_reference: coords.upper_reference,
            lower_orientation: coords.lower_orientation,
            upper_orientation: coords.upper_orientation,
            unpaired: coords.unpaired,
            unmapped_sourced: coords.unmapped_sourced,
        }
    }
}

/// Combined absolute end-position distance, or `None` when incomparable.
fn combined_distance(a: &FragmentCoords, b: &FragmentCoords) -> Option<i64> {
    let lower = (a.lower_position - b.lower_position).abs();
    let upper = match (a.upper_position == NO_POSITION, b.upper_position == NO_POSITION) {
        (true, true) => 0,
        (false, false) => (a.upper_position - b.upper_position).abs(),
        _ => return None,
    };
    Some(lower + upper)
}

/// Deterministic tie-break key for survivor selection.
fn priority_key(fragment: &Fragment) -> (i64, i64, String) {
    let coords = fragment.coordinates();
    (coords.lower_position, coords.upper_position, fragment.umi().unwrap_or("").to_string())
}

/// Collapses near-coincident fragments for coarse-ended platforms.
#[must_use]
pub fn distance_collapse(fragments: Vec<Fragment>, max_distance: i64) -> Vec<Fragment> {
    if max_distance <= 0 {
        return fragments;
    }

    let mut buckets: AHashMap<DistanceKey, Vec<usize>> = AHashMap::new();
    for (i, fragment) in fragments.iter().enumerate() {
        buckets.entry(DistanceKey::of(fragment.coordinates())).or_default().push(i);
    }

    let mut slots: Vec<Option<Fragment>> = fragments.into_iter().map(Some).collect();

    for indices in buckets.into_values() {
        if indices.len() < 2 {
            continue;
        }

        // Greedy: always take the merge producing the largest resulting
        // group; ties fall to the earliest/lowest-coordinate pair.
        loop {
            let mut best: Option<(usize, usize, usize)> = None;
            for (slot_a, &i) in indices.iter().enumerate() {
                for &j in &indices[slot_a + 1..] {
                    let (Some(a), Some(b)) = (slots[i].as_ref(), slots[j].as_ref()) else {
                        continue;
                    };
                    let within = combined_distance(a.coordinates(), b.coordinates())
                        .is_some_and(|d| d <= max_distance);
                    if !within {
                        continue;
                    }
                    let resulting = a.total_read_count() + b.total_read_count();
                    let better = match best {
                        None => true,
                        Some((_, _, best_size)) => resulting > best_size,
                    };
                    if better {
                        best = Some((i, j, resulting));
                    }
                }
            }

            let Some((i, j, _)) = best else {
                break;
            };

            // The fragment with more reads survives; ties fall to the
            // earliest/lowest coordinate so results are order-independent.
            let survivor_first = {
                let a = slots[i].as_ref().expect("candidate slot filled");
                let b = slots[j].as_ref().expect("candidate slot filled");
                match a.total_read_count().cmp(&b.total_read_count()) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => priority_key(a) <= priority_key(b),
                }
            };
            let (survivor_idx, absorbed_idx) = if survivor_first { (i, j) } else { (j, i) };

            let absorbed = slots[absorbed_idx].take().expect("candidate slot filled");
            let survivor = slots[survivor_idx].take().expect("candidate slot filled");
            let mut group = survivor.into_group();
            group.absorb(absorbed, true);
            exclude_inconsistent_supplementaries(&mut group, max_distance);
            slots[survivor_idx] = Some(Fragment::Group(group));
        }
    }

    slots.into_iter().flatten().collect()
}

/// Reclassifies supplementary reads whose own 5' position falls outside
/// `max_distance` of the surviving template's coordinates.
fn exclude_inconsistent_supplementaries(group: &mut DuplicateGroup, max_distance: i64) {
    let lower = group.coordinates.lower_position;
    let upper = group.coordinates.upper_position;

    let mut index = 0;
    while index < group.reads.len() {
        let read = &group.reads[index];
        if !read.flags().is_supplementary() {
            index += 1;
            continue;
        }

        let consistent = unclipped_five_prime_position(read).is_some_and(|position| {
            let to_lower = (position - lower).abs();
            let to_upper =
                if upper == NO_POSITION { i64::MAX } else { (position - upper).abs() };
            to_lower.min(to_upper) <= max_distance
        });

        if consistent {
            index += 1;
        } else {
            group.demote_read(index);
        }
    }
}
