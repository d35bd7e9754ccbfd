//! Windowed, position-bucketed read cache with eviction-driven emission.
//!
//! The cache bounds memory while streaming coordinate-sorted records: reads
//! are placed into fixed-width position buckets keyed by their *fragment*
//! anchor position (not raw alignment start), and a bucket's fragment
//! coordinates are only emitted once the stream watermark guarantees no
//! further reads can join them.
//!
//! Forward-anchored coordinates stay cached until the watermark clears the
//! bucket by the maximum soft-clip length (a later read's unclipped start can
//! reach back that far); reverse-anchored coordinates are final as soon as
//! the watermark passes their bucket.

use std::collections::BTreeMap;

use ahash::AHashMap;
use log::warn;

use crate::fragment_coords::{FragmentCoords, NO_POSITION, Orientation};
use crate::read_info::{DuplicateGroup, Fragment, ReadInfo};

/// Reads emitted for a set of fully-resolved fragment coordinates,
/// partitioned into duplicate groups (>= 2 reads) and singles.
#[derive(Debug, Default)]
pub struct FragmentCoordReads {
    /// Coordinates shared by two or more reads.
    pub duplicate_groups: Vec<DuplicateGroup>,
    /// Coordinates seen on exactly one read.
    pub singles: Vec<ReadInfo>,
}

impl FragmentCoordReads {
    /// Total number of reads carried.
    #[must_use]
    pub fn read_count(&self) -> usize {
        let grouped: usize = self.duplicate_groups.iter().map(DuplicateGroup::total_read_count).sum();
        grouped + self.singles.len()
    }

    /// True when nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.duplicate_groups.is_empty() && self.singles.is_empty()
    }

    /// Converts the emission into a uniform fragment list.
    #[must_use]
    pub fn into_fragments(self) -> Vec<Fragment> {
        let mut fragments: Vec<Fragment> =
            self.duplicate_groups.into_iter().map(Fragment::Group).collect();
        fragments.extend(self.singles.into_iter().map(Fragment::Single));
        fragments
    }
}

/// A position bucket: exact fragment coordinates to the reads sharing them.
type Bucket = AHashMap<FragmentCoords, Vec<ReadInfo>>;

/// Windowed cache of reads awaiting coordinate resolution.
pub struct ReadCache {
    /// Bucket width in bases; empirically larger than the platform's maximum
    /// soft-clip length.
    group_size: i64,
    /// Maximum soft-clip length guarding forward-anchored eviction.
    max_soft_clip: i64,
    /// Buckets keyed by (reference index, bucket start).
    buckets: BTreeMap<(i32, i64), Bucket>,
    /// Reference the watermark currently lives on.
    current_reference: i32,
    /// Minimum position of unresolved reads on `current_reference`.
    current_read_min_position: i64,
    /// Watermark at the last eviction scan.
    last_check_position: i64,
    /// Reads whose anchor fell outside the addressable window; only findable
    /// again at [`ReadCache::evict_all`] time.
    overflow: Vec<ReadInfo>,
    /// Count of reads routed to `overflow`, for metrics.
    out_of_window: u64,
    /// Number of reads currently cached (buckets + overflow).
    cached_reads: usize,
}

impl ReadCache {
    /// Creates a cache with the given bucket width and soft-clip guard.
    #[must_use]
    pub fn new(group_size: u32, max_soft_clip: u32) -> Self {
        Self {
            group_size: i64::from(group_size.max(1)),
            max_soft_clip: i64::from(max_soft_clip),
            buckets: BTreeMap::new(),
            current_reference: -1,
            current_read_min_position: i64::MIN,
            last_check_position: i64::MIN,
            overflow: Vec::new(),
            out_of_window: 0,
            cached_reads: 0,
        }
    }

    /// Number of reads currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cached_reads
    }

    /// True when the cache holds no reads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cached_reads == 0
    }

    /// Number of reads that fell outside the addressable window so far.
    #[must_use]
    pub fn out_of_window(&self) -> u64 {
        self.out_of_window
    }

    /// The start of the bucket covering `position`.
    fn bucket_start(&self, position: i64) -> i64 {
        (position - 1).div_euclid(self.group_size) * self.group_size + 1
    }

    /// Inserts a read into the bucket owning its fragment anchor position and
    /// advances the watermark to the read's alignment start.
    ///
    /// A read whose anchor would index below the already-evicted window is
    /// logged and kept aside; it degrades to being findable only at
    /// [`ReadCache::evict_all`] time.
    pub fn process_read(&mut self, info: ReadInfo) {
        let reference = info.coordinates.anchor_reference();

        // Advance the watermark from the record's own alignment start.
        if let Some(start) = info.read.alignment_start() {
            let start = usize::from(start) as i64;
            if reference > self.current_reference {
                self.current_reference = reference;
                self.current_read_min_position = start;
            } else if start > self.current_read_min_position {
                self.current_read_min_position = start;
            }
        }

        self.insert(info);
    }

    /// Inserts a read claimed from a neighboring partition.
    ///
    /// The read's alignment start belongs to another region's stream, so the
    /// watermark is left untouched; only this partition's own slice drives
    /// eviction.
    pub fn insert_deferred(&mut self, info: ReadInfo) {
        self.insert(info);
    }

    fn insert(&mut self, info: ReadInfo) {
        let reference = info.coordinates.anchor_reference();
        let position = info.coordinates.anchor_position();

        self.cached_reads += 1;

        let orientation = info.coordinates.anchor_orientation();
        if position == NO_POSITION || self.is_below_eviction_floor(reference, position, orientation)
        {
            self.out_of_window += 1;
            if self.out_of_window <= 10 {
                warn!(
                    "Read '{}' anchor {}:{} falls outside the cache window; \
                     deferring to final flush",
                    info.read.name().map_or_else(String::new, |n| String::from_utf8_lossy(
                        n.as_ref()
                    )
                    .to_string()),
                    reference,
                    position
                );
            }
            self.overflow.push(info);
            return;
        }

        let key = (reference, self.bucket_start(position));
        let bucket = self.buckets.entry(key).or_default();
        bucket.entry(info.coordinates.clone()).or_default().push(info);
    }

    /// True when `position` lies in a region already cleared by eviction
    /// for the given anchor orientation.
    fn is_below_eviction_floor(
        &self,
        reference: i32,
        position: i64,
        orientation: Orientation,
    ) -> bool {
        if reference < self.current_reference {
            return true;
        }
        if reference > self.current_reference || self.last_check_position == i64::MIN {
            return false;
        }
        let floor = match orientation {
            Orientation::Forward => {
                self.last_check_position.saturating_sub(self.max_soft_clip)
            }
            Orientation::Reverse => self.last_check_position,
        };
        self.bucket_start(position) + self.group_size <= floor
    }

    /// Emits fragment coordinates that can no longer receive reads.
    ///
    /// Cheap no-op unless the watermark advanced at least one bucket width
    /// since the previous scan. Forward-anchored coordinates are released
    /// when their bucket lies entirely below `watermark - max_soft_clip`;
    /// reverse-anchored coordinates when entirely below the watermark.
    pub fn pop_reads(&mut self) -> FragmentCoordReads {
        if self.current_read_min_position == i64::MIN
            || self.current_read_min_position.saturating_sub(self.last_check_position)
                < self.group_size
        {
            return FragmentCoordReads::default();
        }
        self.last_check_position = self.current_read_min_position;

        let watermark = self.current_read_min_position;
        let forward_limit = watermark - self.max_soft_clip;
        let reference = self.current_reference;

        let mut emitted = FragmentCoordReads::default();
        let mut emptied: Vec<(i32, i64)> = Vec::new();

        for (&(bucket_ref, bucket_start), bucket) in &mut self.buckets {
            let bucket_end = bucket_start + self.group_size;
            let earlier_reference = bucket_ref < reference;
            if !earlier_reference && bucket_ref > reference {
                break;
            }

            let reverse_ready = earlier_reference || bucket_end <= watermark;
            let forward_ready = earlier_reference || bucket_end <= forward_limit;
            if !reverse_ready {
                continue;
            }

            let ready: Vec<FragmentCoords> = bucket
                .keys()
                .filter(|coords| match coords.anchor_orientation() {
                    Orientation::Forward => forward_ready,
                    Orientation::Reverse => reverse_ready,
                })
                .cloned()
                .collect();

            for coords in ready {
                if let Some(reads) = bucket.remove(&coords) {
                    Self::emit(&mut emitted, coords, reads);
                }
            }
            if bucket.is_empty() {
                emptied.push((bucket_ref, bucket_start));
            }
        }

        for key in emptied {
            self.buckets.remove(&key);
        }
        self.cached_reads -= emitted.read_count();
        emitted
    }

    /// Unconditionally flushes every cached read, including reads previously
    /// set aside as out-of-window. Used at partition and chromosome
    /// boundaries.
    pub fn evict_all(&mut self) -> FragmentCoordReads {
        let mut emitted = FragmentCoordReads::default();

        // Group the overflow reads with everything else so out-of-window
        // duplicates still coalesce at flush time.
        let mut pending: AHashMap<FragmentCoords, Vec<ReadInfo>> = AHashMap::new();
        for info in self.overflow.drain(..) {
            pending.entry(info.coordinates.clone()).or_default().push(info);
        }
        for (_, bucket) in std::mem::take(&mut self.buckets) {
            for (coords, reads) in bucket {
                pending.entry(coords).or_default().extend(reads);
            }
        }

        for (coords, reads) in pending {
            Self::emit(&mut emitted, coords, reads);
        }

        self.cached_reads = 0;
        self.current_read_min_position = i64::MIN;
        self.last_check_position = i64::MIN;
        self.current_reference = -1;
        emitted
    }

    /// Partitions one coordinate's reads into a group or a single.
    fn emit(emitted: &mut FragmentCoordReads, coords: FragmentCoords, mut reads: Vec<ReadInfo>) {
        if reads.len() >= 2 {
            let records = reads.into_iter().map(|info| info.read).collect();
            emitted.duplicate_groups.push(DuplicateGroup::new(coords, records));
        } else if let Some(info) = reads.pop() {
            emitted.singles.push(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::RecordBuilder;

    fn read_at(name: &str, start: usize, reverse: bool) -> ReadInfo {
        let record = RecordBuilder::new()
            .name(name)
            .sequence("ACGTACGTAC")
            .alignment_start(start)
            .cigar("10M")
            .reverse_complement(reverse)
            .build();
        let coords = FragmentCoords::from_read(&record, None);
        ReadInfo::new(record, coords)
    }

    /// A forward read whose watermark contribution can be far ahead of its
    /// fragment anchor (simulating later stream reads).
    fn watermark_read(start: usize) -> ReadInfo {
        read_at("watermark", start, false)
    }

    #[test]
    fn test_duplicates_grouped_singles_separate() {
        let mut cache = ReadCache::new(200, 150);
        cache.process_read(read_at("a", 100, false));
        cache.process_read(read_at("b", 100, false));
        cache.process_read(read_at("c", 150, false));

        let emitted = cache.evict_all();
        assert_eq!(emitted.duplicate_groups.len(), 1);
        assert_eq!(emitted.duplicate_groups[0].reads.len(), 2);
        assert_eq!(emitted.singles.len(), 1);
    }

    #[test]
    fn test_no_data_loss_on_flush() {
        let mut cache = ReadCache::new(200, 150);
        let total = 25;
        for i in 0..total {
            cache.process_read(read_at(&format!("r{i}"), 100 + i * 7, i % 3 == 0));
        }

        let mut seen = 0;
        loop {
            let emitted = cache.pop_reads();
            if emitted.is_empty() {
                break;
            }
            seen += emitted.read_count();
        }
        seen += cache.evict_all().read_count();
        assert_eq!(seen, total);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_forward_eviction_waits_for_soft_clip_guard() {
        // group_size=200, max_soft_clip=150. A forward read at 100 sits in
        // the bucket [1, 201); it must not be evicted while the watermark is
        // within 150 of the bucket's upper boundary.
        let mut cache = ReadCache::new(200, 150);
        cache.process_read(read_at("a", 100, false));

        // Watermark at 350: bucket_end (201) > 350 - 150 = 200, keep cached.
        cache.process_read(watermark_read(350));
        let emitted = cache.pop_reads();
        assert_eq!(emitted.read_count(), 0);

        // Watermark at 560: bucket_end (201) <= 560 - 150 = 410, released.
        cache.process_read(watermark_read(560));
        let emitted = cache.pop_reads();
        assert!(emitted.singles.iter().any(|info| {
            info.read.name().map(|n| AsRef::<[u8]>::as_ref(n) == b"a".as_slice()).unwrap_or(false)
        }));
    }

    #[test]
    fn test_reverse_eviction_strictly_below_watermark() {
        // A reverse read anchors at its unclipped end (final once passed).
        let mut cache = ReadCache::new(200, 150);
        cache.process_read(read_at("rev", 100, true)); // anchor = 109, bucket [1, 201)

        // Watermark at 150: bucket not yet entirely below it.
        cache.process_read(watermark_read(150));
        assert_eq!(cache.pop_reads().read_count(), 0);

        // Watermark at 410: reverse coordinate released; the forward
        // watermark reads stay until their own guard clears.
        cache.process_read(watermark_read(410));
        let emitted = cache.pop_reads();
        assert!(emitted.singles.iter().any(|info| {
            info.read.name().map(|n| AsRef::<[u8]>::as_ref(n) == b"rev".as_slice()).unwrap_or(false)
        }));
    }

    #[test]
    fn test_pop_reads_is_noop_until_watermark_advances() {
        let mut cache = ReadCache::new(200, 150);
        cache.process_read(read_at("a", 100, false));
        // First scan sets the check position; repeated calls without
        // watermark movement do nothing.
        let _ = cache.pop_reads();
        cache.process_read(read_at("b", 101, false));
        assert_eq!(cache.pop_reads().read_count(), 0);
    }

    #[test]
    fn test_reads_group_only_on_equal_coordinates() {
        let mut cache = ReadCache::new(200, 150);
        cache.process_read(read_at("a", 100, false));
        cache.process_read(read_at("b", 100, true)); // same start, other strand

        let emitted = cache.evict_all();
        assert_eq!(emitted.duplicate_groups.len(), 0);
        assert_eq!(emitted.singles.len(), 2);
    }

    #[test]
    fn test_evict_all_resets_cache() {
        let mut cache = ReadCache::new(200, 150);
        cache.process_read(read_at("a", 100, false));
        let _ = cache.evict_all();
        assert!(cache.is_empty());

        // Reusable afterwards, e.g. for the next chromosome.
        cache.process_read(read_at("b", 50, false));
        assert_eq!(cache.evict_all().read_count(), 1);
    }
}
