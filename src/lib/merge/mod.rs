//! Fuzzy merge passes over coordinate-resolved fragments.
//!
//! Each pass is a pure function `(Vec<Fragment>) -> Vec<Fragment>` with an
//! internal candidate structure, returning a fresh collection rather than
//! mutating in place. Cluster membership is tracked with a disjoint-set
//! arena of index-based parent pointers.
//!
//! Pass order is fixed by the pipeline: UMI-cluster, duplex, jitter,
//! poly-tail, platform-distance.

pub mod distance;
pub mod duplex;
pub mod jitter;
pub mod poly_tail;

pub use distance::distance_collapse;
pub use duplex::duplex_merge;
pub use jitter::jitter_merge;
pub use poly_tail::poly_tail_merge;

/// Disjoint-set (union-find) over indices, with path compression.
///
/// Used by the jitter and platform-distance passes to accumulate merge
/// clusters from pairwise candidate decisions.
pub struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    /// Creates a forest of `len` singleton clusters.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { parent: (0..len).collect() }
    }

    /// Finds the representative of `index`, compressing the path.
    pub fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut current = index;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Joins the clusters containing `a` and `b`.
    pub fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            // Deterministic: lower root index wins.
            if root_a < root_b {
                self.parent[root_b] = root_a;
            } else {
                self.parent[root_a] = root_b;
            }
        }
    }

    /// Groups all indices by their cluster representative.
    ///
    /// Returns clusters in ascending order of representative, members in
    /// ascending index order.
    pub fn clusters(&mut self) -> Vec<Vec<usize>> {
        let len = self.parent.len();
        let mut by_root: std::collections::BTreeMap<usize, Vec<usize>> =
            std::collections::BTreeMap::new();
        for i in 0..len {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        by_root.into_values().collect()
    }
}
