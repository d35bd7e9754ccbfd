//! UMI-aware clustering of coordinate-matched reads.
//!
//! Reads sharing a fragment coordinate are folded into UMI families in three
//! passes:
//!
//! 1. **Exact bucketing** by verbatim UMI (or by canonical defined UMI when
//!    an allow-list resolves every read unambiguously).
//! 2. **Directional size-descending merge**: smaller buckets fold into the
//!    first larger-or-equal bucket within the permitted base difference,
//!    restarting after every merge. The asymmetric, count-ordered rule
//!    collapses sequencing errors into the dominant true UMI without merging
//!    two real, comparably-sized families.
//! 3. **Tolerant pass** at `permitted_base_diff + 1`, symmetric.
//! 4. **Imbalance pass**: once a bucket exceeds the large-group threshold,
//!    pairs with a size ratio at or above that threshold merge within a
//!    wider tolerance, so noise fragments cannot split off a dominant group.

use log::debug;

use crate::read_info::{DuplicateGroup, Fragment, ReadInfo};
use crate::umi::{DefinedUmis, hamming_distance};

/// Configuration for UMI clustering.
pub struct UmiGrouperConfig {
    /// Permitted base difference for the directional merge pass.
    pub permitted_base_diff: u32,
    /// Large-group threshold and minimum size ratio for the imbalance pass.
    pub imbalance_ratio: usize,
    /// Wider tolerance used by the imbalance pass.
    pub imbalance_base_diff: u32,
    /// Optional allow-list of defined UMIs.
    pub defined: Option<DefinedUmis>,
}

impl Default for UmiGrouperConfig {
    fn default() -> Self {
        Self {
            permitted_base_diff: 1,
            imbalance_ratio: 10,
            imbalance_base_diff: 3,
            defined: None,
        }
    }
}

/// A UMI family accumulating reads during clustering.
struct UmiBucket {
    umi: String,
    reads: Vec<ReadInfo>,
}

/// Clusters reads by UMI within one coordinate bucket.
pub struct UmiGroupBuilder {
    config: UmiGrouperConfig,
    /// Number of bucket merges performed, for metrics.
    merges: u64,
    /// Reads whose UMI could not be resolved against the allow-list.
    unresolved_defined: u64,
}

impl UmiGroupBuilder {
    /// Creates a builder with the given configuration.
    #[must_use]
    pub fn new(config: UmiGrouperConfig) -> Self {
        Self { config, merges: 0, unresolved_defined: 0 }
    }

    /// Number of UMI bucket merges performed so far.
    #[must_use]
    pub fn merges(&self) -> u64 {
        self.merges
    }

    /// Number of reads that failed to resolve against the defined allow-list.
    #[must_use]
    pub fn unresolved_defined(&self) -> u64 {
        self.unresolved_defined
    }

    /// Clusters the reads of one coordinate bucket into UMI families.
    ///
    /// Returns groups for families with two or more reads and singles
    /// otherwise; the canonical family UMI is written back into each
    /// fragment's coordinates.
    pub fn group_reads(&mut self, reads: Vec<ReadInfo>) -> Vec<Fragment> {
        let mut buckets = self.exact_buckets(reads);
        self.directional_merge(&mut buckets);
        self.tolerant_merge(&mut buckets);
        self.imbalance_merge(&mut buckets);

        buckets
            .into_iter()
            .map(|bucket| {
                let UmiBucket { umi, mut reads } = bucket;
                if reads.len() >= 2 {
                    let mut coordinates = reads[0].coordinates.clone();
                    coordinates.umi = Some(umi);
                    let records = reads.into_iter().map(|info| info.read).collect();
                    Fragment::Group(DuplicateGroup::new(coordinates, records))
                } else {
                    let mut info = reads.remove(0);
                    info.coordinates.umi = Some(umi);
                    Fragment::Single(info)
                }
            })
            .collect()
    }

    /// Pass 1: exact bucketing by verbatim (or canonical defined) UMI.
    fn exact_buckets(&mut self, reads: Vec<ReadInfo>) -> Vec<UmiBucket> {
        // Canonical defined UMIs apply only when every read resolves uniquely.
        let canonical: Option<Vec<String>> = self.config.defined.as_ref().and_then(|defined| {
            let mut resolved = Vec::with_capacity(reads.len());
            for info in &reads {
                let umi = info.umi().unwrap_or("");
                match defined.resolve(umi, self.config.permitted_base_diff) {
                    Some(canonical) => resolved.push(canonical.to_string()),
                    None => {
                        self.unresolved_defined += 1;
                        debug!("UMI '{umi}' not resolvable against defined list; falling back");
                        return None;
                    }
                }
            }
            Some(resolved)
        });

        let mut buckets: Vec<UmiBucket> = Vec::new();
        for (i, info) in reads.into_iter().enumerate() {
            let umi = match &canonical {
                Some(resolved) => resolved[i].clone(),
                None => info.umi().unwrap_or("").to_ascii_uppercase(),
            };
            match buckets.iter_mut().find(|b| b.umi == umi) {
                Some(bucket) => bucket.reads.push(info),
                None => buckets.push(UmiBucket { umi, reads: vec![info] }),
            }
        }
        buckets
    }

    /// Sorts buckets by descending read count, ties broken by UMI string.
    fn sort_buckets(buckets: &mut [UmiBucket]) {
        buckets.sort_by(|a, b| {
            b.reads.len().cmp(&a.reads.len()).then_with(|| a.umi.cmp(&b.umi))
        });
    }

    /// Pass 2: directional size-descending merge, restarting after each fold.
    fn directional_merge(&mut self, buckets: &mut Vec<UmiBucket>) {
        let diff = self.config.permitted_base_diff;
        'outer: loop {
            Self::sort_buckets(buckets);
            // Fold each smaller bucket into the first larger-or-equal bucket
            // within the permitted base difference.
            for smaller in (1..buckets.len()).rev() {
                for larger in 0..smaller {
                    let within = hamming_distance(&buckets[larger].umi, &buckets[smaller].umi)
                        .is_some_and(|d| d <= diff);
                    if within && buckets[larger].reads.len() >= buckets[smaller].reads.len() {
                        let folded = buckets.remove(smaller);
                        buckets[larger].reads.extend(folded.reads);
                        self.merges += 1;
                        continue 'outer;
                    }
                }
            }
            break;
        }
    }

    /// Pass 3: symmetric merge at `permitted_base_diff + 1`.
    fn tolerant_merge(&mut self, buckets: &mut Vec<UmiBucket>) {
        let diff = self.config.permitted_base_diff + 1;
        self.merge_symmetric(buckets, diff, None);
    }

    /// Pass 4: imbalanced pairs merge within the wider tolerance.
    fn imbalance_merge(&mut self, buckets: &mut Vec<UmiBucket>) {
        let threshold = self.config.imbalance_ratio;
        if threshold == 0 || !buckets.iter().any(|b| b.reads.len() > threshold) {
            return;
        }
        self.merge_symmetric(buckets, self.config.imbalance_base_diff, Some(threshold));
    }

    /// Merges any pair of buckets within `diff`, larger bucket surviving.
    ///
    /// With `min_ratio` set, a pair only merges when the larger bucket is at
    /// least `min_ratio` times the smaller.
    fn merge_symmetric(
        &mut self,
        buckets: &mut Vec<UmiBucket>,
        diff: u32,
        min_ratio: Option<usize>,
    ) {
        'outer: loop {
            Self::sort_buckets(buckets);
            for smaller in (1..buckets.len()).rev() {
                for larger in 0..smaller {
                    let within = hamming_distance(&buckets[larger].umi, &buckets[smaller].umi)
                        .is_some_and(|d| d <= diff);
                    if !within {
                        continue;
                    }
                    if let Some(ratio) = min_ratio {
                        if buckets[larger].reads.len() < buckets[smaller].reads.len() * ratio {
                            continue;
                        }
                    }
                    let folded = buckets.remove(smaller);
                    buckets[larger].reads.extend(folded.reads);
                    self.merges += 1;
                    continue 'outer;
                }
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment_coords::FragmentCoords;
    use crate::sam::builder::RecordBuilder;

    fn read_with_umi(name: &str, umi: &str) -> ReadInfo {
        let record = RecordBuilder::new()
            .name(name)
            .sequence("ACGTACGTAC")
            .alignment_start(100)
            .cigar("10M")
            .build();
        let mut coordinates = FragmentCoords::from_read(&record, Some(umi.to_string()));
        coordinates.umi = Some(umi.to_string());
        ReadInfo::new(record, coordinates)
    }

    fn reads_with_umis(umis: &[&str]) -> Vec<ReadInfo> {
        umis.iter().enumerate().map(|(i, umi)| read_with_umi(&format!("r{i}"), umi)).collect()
    }

    fn builder() -> UmiGroupBuilder {
        UmiGroupBuilder::new(UmiGrouperConfig::default())
    }

    #[test]
    fn test_single_mismatch_merges() {
        // "AAAAA" and "AAAAT" at distance 1 merge into one
        // group with total_read_count == 2.
        let fragments = builder().group_reads(reads_with_umis(&["AAAAA", "AAAAT"]));
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].total_read_count(), 2);
        assert_eq!(fragments[0].umi(), Some("AAAAA"));
    }

    #[test]
    fn test_exact_umis_bucket_together() {
        let fragments = builder().group_reads(reads_with_umis(&["AAAAA", "AAAAA", "CCCCC"]));
        assert_eq!(fragments.len(), 2);
        let counts: Vec<usize> = fragments.iter().map(Fragment::total_read_count).collect();
        assert!(counts.contains(&2));
        assert!(counts.contains(&1));
    }

    #[test]
    fn test_directional_merge_favors_dominant_umi() {
        // Three reads of AAAAA, one error read AAAAT: errors collapse into
        // the dominant family and the family keeps the dominant UMI.
        let fragments =
            builder().group_reads(reads_with_umis(&["AAAAA", "AAAAA", "AAAAA", "AAAAT"]));
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].umi(), Some("AAAAA"));
        assert_eq!(fragments[0].total_read_count(), 4);
    }

    #[test]
    fn test_distant_umis_stay_separate() {
        let fragments = builder().group_reads(reads_with_umis(&["AAAAA", "GGGGG"]));
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn test_different_length_umis_never_merge() {
        let fragments = builder().group_reads(reads_with_umis(&["AAAA", "AAAAA"]));
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn test_tolerant_pass_merges_at_diff_plus_one() {
        // Distance 2 with permitted diff 1: the tolerant second pass catches it.
        let fragments = builder().group_reads(reads_with_umis(&["AAAAA", "AAATT"]));
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].total_read_count(), 2);
    }

    #[test]
    fn test_imbalance_pass_absorbs_noise_fragment() {
        // 12 reads of one UMI vs a single read at distance 3: too far for the
        // tolerant pass, but the imbalance pass (ratio 10, diff 3) folds it.
        let mut umis = vec!["AAAAAA"; 12];
        umis.push("AATTTA"); // distance 3 from AAAAAA
        let fragments = builder().group_reads(reads_with_umis(&umis));
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].total_read_count(), 13);
    }

    #[test]
    fn test_imbalance_pass_respects_ratio() {
        // Distance 3 but only a 2:1 ratio: stays separate.
        let fragments =
            builder().group_reads(reads_with_umis(&["AAAAAA", "AAAAAA", "AATTTA"]));
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn test_idempotent_on_own_output() {
        let umis = ["AAAAA", "AAAAA", "AAAAT", "CCCCC", "CCCCA", "GGGGG"];
        let mut first = builder();
        let fragments = first.group_reads(reads_with_umis(&umis));

        // Re-cluster one representative read per emitted family: no merges.
        let representative_umis: Vec<String> =
            fragments.iter().map(|f| f.umi().unwrap().to_string()).collect();
        let reads: Vec<ReadInfo> = representative_umis
            .iter()
            .enumerate()
            .flat_map(|(i, umi)| {
                // Preserve family sizes so ratio-driven passes see the same shape.
                let count = fragments[i].total_read_count();
                (0..count).map(move |j| read_with_umi(&format!("x{i}_{j}"), umi))
            })
            .collect();

        let mut second = builder();
        let reclustered = second.group_reads(reads);
        assert_eq!(reclustered.len(), fragments.len());
        assert_eq!(second.merges(), 0);
    }

    #[test]
    fn test_defined_umis_canonicalize() {
        let config = UmiGrouperConfig {
            defined: Some(DefinedUmis::from_umis(vec![
                "AAAAA".to_string(),
                "CCCCC".to_string(),
            ])),
            ..UmiGrouperConfig::default()
        };
        let mut builder = UmiGroupBuilder::new(config);
        let fragments = builder.group_reads(reads_with_umis(&["AAAAT", "AAAAA", "CCCCC"]));
        assert_eq!(fragments.len(), 2);
        let mut umis: Vec<&str> = fragments.iter().filter_map(Fragment::umi).collect();
        umis.sort_unstable();
        assert_eq!(umis, vec!["AAAAA", "CCCCC"]);
    }

    #[test]
    fn test_defined_umis_fallback_on_unknown() {
        let config = UmiGrouperConfig {
            defined: Some(DefinedUmis::from_umis(vec!["AAAAA".to_string()])),
            ..UmiGrouperConfig::default()
        };
        let mut builder = UmiGroupBuilder::new(config);
        // GGGGG cannot resolve: clustering falls back to verbatim UMIs.
        let fragments = builder.group_reads(reads_with_umis(&["AAAAA", "GGGGG"]));
        assert_eq!(fragments.len(), 2);
        assert_eq!(builder.unresolved_defined(), 1);
    }
}
