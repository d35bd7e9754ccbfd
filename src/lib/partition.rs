//! Genome partitioning and the concurrent execution model.
//!
//! The genome (or region set) is split into contiguous partitions sized so
//! that roughly `thread_count` work units exist; a fixed pool of OS worker
//! threads pulls partitions from a queue as they finish, so one long
//! partition never stalls the pool. Each worker owns a private
//! [`ReadCache`]/[`DuplicateGroupBuilder`] pair; the only cross-thread state
//! is the [`PartitionDataStore`], guarded by a single coarse lock since only
//! boundary-crossing reads touch it.

use std::path::Path;
use std::sync::mpsc;

use anyhow::{Context, Result, anyhow};
use crossbeam_queue::SegQueue;
use log::{debug, info};
use noodles::core::{Position, Region};
use noodles::sam::Header;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use parking_lot::Mutex;

use ahash::AHashMap;

use crate::bam_io::{IndexedBamReader, create_indexed_bam_reader};
use crate::consensus::is_consensus_read;
use crate::fragment_coords::FragmentCoords;
use crate::group_builder::{DuplicateGroupBuilder, GroupBuilderConfig};
use crate::metrics::CollapseMetrics;
use crate::read_cache::{FragmentCoordReads, ReadCache};
use crate::read_info::{Fragment, ReadInfo};
use crate::umi::{DefinedUmis, UmiExtractor};

/// Minimum tail-region buffer: a terminal chunk shorter than this folds into
/// its predecessor so no partition is pathologically short.
pub const MIN_PARTITION_TAIL: usize = 1_000_000;

/// Configuration consumed by the collapsing core.
#[derive(Clone)]
pub struct CollapseOptions {
    /// Cache bucket width in bases.
    pub group_size: u32,
    /// Maximum soft-clip length guarding forward-anchored eviction.
    pub max_soft_clip: u32,
    /// Whether UMI-aware clustering is enabled.
    pub umi_enabled: bool,
    /// Read-identifier delimiter preceding the UMI suffix.
    pub umi_delimiter: char,
    /// Whether duplex half matching is enabled.
    pub duplex_enabled: bool,
    /// Delimiter between duplex UMI halves.
    pub duplex_delimiter: char,
    /// Permitted UMI base difference.
    pub permitted_base_diff: u32,
    /// Large-group threshold / size ratio for the imbalance pass.
    pub imbalance_ratio: usize,
    /// Wider tolerance for the imbalance pass.
    pub imbalance_base_diff: u32,
    /// Maximum single-end jitter shift (0 disables).
    pub jitter_distance: i64,
    /// Tight UMI tolerance reserved for jitter.
    pub jitter_umi_edits: u32,
    /// Minimum trailing run for the poly-tail merge (0 disables).
    pub poly_tail_min_length: usize,
    /// Maximum combined end distance for the platform collapse (0 disables).
    pub collapse_distance: i64,
    /// Genomic partition width in bases.
    pub partition_size: usize,
    /// Worker thread count.
    pub threads: usize,
    /// Drop duplicates instead of flagging them.
    pub remove_duplicates: bool,
    /// Optional defined-UMI allow-list.
    pub defined_umis: Option<DefinedUmis>,
}

impl Default for CollapseOptions {
    fn default() -> Self {
        Self {
            group_size: 300,
            max_soft_clip: 150,
            umi_enabled: true,
            umi_delimiter: ':',
            duplex_enabled: false,
            duplex_delimiter: '-',
            permitted_base_diff: 1,
            imbalance_ratio: 10,
            imbalance_base_diff: 3,
            jitter_distance: 3,
            jitter_umi_edits: 0,
            poly_tail_min_length: 2,
            collapse_distance: 0,
            partition_size: 50_000_000,
            threads: 1,
            remove_duplicates: false,
            defined_umis: None,
        }
    }
}

impl CollapseOptions {
    fn builder_config(&self) -> GroupBuilderConfig {
        GroupBuilderConfig {
            umi_enabled: self.umi_enabled,
            duplex_enabled: self.duplex_enabled,
            duplex_delimiter: self.duplex_delimiter,
            permitted_base_diff: self.permitted_base_diff,
            imbalance_ratio: self.imbalance_ratio,
            imbalance_base_diff: self.imbalance_base_diff,
            jitter_distance: self.jitter_distance,
            jitter_umi_edits: self.jitter_umi_edits,
            poly_tail_min_length: self.poly_tail_min_length,
            collapse_distance: self.collapse_distance,
        }
    }
}

/// A contiguous genomic region assigned to one worker at a time.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Stable identifier, also the key into the [`PartitionDataStore`].
    pub index: usize,
    /// Reference sequence index in the header.
    pub reference_index: usize,
    /// Reference sequence name.
    pub reference_name: String,
    /// 1-based inclusive region start.
    pub start: usize,
    /// 1-based inclusive region end.
    pub end: usize,
}

/// The ordered set of partitions covering the input.
#[derive(Debug, Clone, Default)]
pub struct PartitionList {
    partitions: Vec<Partition>,
}

impl PartitionList {
    /// Splits the header's reference sequences into partitions.
    ///
    /// Chunks default to `partition_size`; when that would produce fewer
    /// chunks than threads on a large input, the width shrinks toward
    /// `total_span / threads` (never below the tail buffer). Terminal chunks
    /// shorter than [`MIN_PARTITION_TAIL`] fold into their predecessor.
    #[must_use]
    pub fn build(header: &Header, partition_size: usize, threads: usize) -> Self {
        let references: Vec<(String, usize)> = header
            .reference_sequences()
            .iter()
            .map(|(name, map)| {
                (String::from_utf8_lossy(name).to_string(), usize::from(map.length()))
            })
            .collect();

        let total_span: usize = references.iter().map(|(_, length)| length).sum();
        let mut chunk = partition_size.max(MIN_PARTITION_TAIL);
        if threads > 1 && total_span / chunk < threads {
            chunk = (total_span / threads).max(MIN_PARTITION_TAIL);
        }

        let mut partitions = Vec::new();
        for (reference_index, (reference_name, length)) in references.into_iter().enumerate() {
            let mut start = 1usize;
            while start <= length {
                let mut end = (start + chunk - 1).min(length);
                if length - end < MIN_PARTITION_TAIL {
                    end = length;
                }
                partitions.push(Partition {
                    index: partitions.len(),
                    reference_index,
                    reference_name: reference_name.clone(),
                    start,
                    end,
                });
                start = end + 1;
            }
        }

        info!("Split {} references into {} partitions", header.reference_sequences().len(), partitions.len());
        Self { partitions }
    }

    /// Number of partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// True when no partitions exist (no reference sequences).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Iterates the partitions in genomic order.
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    /// Finds the partition owning `position` on `reference_index`.
    ///
    /// Positions before the reference start (possible for unclipped starts)
    /// map to the reference's first partition; positions past its end map to
    /// the last.
    #[must_use]
    pub fn find(&self, reference_index: i32, position: i64) -> Option<usize> {
        if reference_index < 0 {
            return None;
        }
        let reference_index = reference_index as usize;
        let position = position.max(1) as usize;

        let mut owner = None;
        for partition in &self.partitions {
            if partition.reference_index != reference_index {
                continue;
            }
            owner = Some(partition.index);
            if position <= partition.end {
                break;
            }
        }
        owner
    }
}

/// Per-partition state living in the shared store.
#[derive(Default)]
struct PartitionData {
    /// Reads deferred to this partition by its neighbors.
    deferred: Vec<ReadInfo>,
    /// Set once the owning partition finished draining.
    complete: bool,
}

/// The only cross-thread mutable structure: boundary-crossing reads and
/// completion state, under one coarse lock (contention is low because only
/// partition-boundary reads touch it).
#[derive(Default)]
pub struct PartitionDataStore {
    inner: Mutex<AHashMap<usize, PartitionData>>,
}

impl PartitionDataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defers a read to the partition owning its fragment anchor.
    pub fn defer(&self, partition: usize, info: ReadInfo) {
        self.inner.lock().entry(partition).or_default().deferred.push(info);
    }

    /// Claims all reads deferred to `partition` so far.
    #[must_use]
    pub fn claim(&self, partition: usize) -> Vec<ReadInfo> {
        let mut inner = self.inner.lock();
        match inner.get_mut(&partition) {
            Some(data) => std::mem::take(&mut data.deferred),
            None => Vec::new(),
        }
    }

    /// Marks a partition as complete, releasing nothing deferred to it.
    pub fn mark_complete(&self, partition: usize) {
        self.inner.lock().entry(partition).or_default().complete = true;
    }

    /// True when the partition has finished draining.
    #[must_use]
    pub fn is_complete(&self, partition: usize) -> bool {
        self.inner.lock().get(&partition).is_some_and(|data| data.complete)
    }

    /// Drains every read still unclaimed; called once after all partitions.
    #[must_use]
    pub fn drain_unresolved(&self) -> Vec<ReadInfo> {
        let mut inner = self.inner.lock();
        let mut unresolved = Vec::new();
        for (_, data) in inner.iter_mut() {
            unresolved.append(&mut data.deferred);
        }
        unresolved
    }
}

/// Lifecycle of one partition's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Created, not yet reading.
    Idle,
    /// Reading records in the region.
    Slicing,
    /// Evicting remaining cache contents.
    Draining,
    /// Finished; private cache memory released.
    Complete,
}

/// Processes one partition with a private cache and group builder.
pub struct PartitionReader {
    partition: Partition,
    cache: ReadCache,
    builder: DuplicateGroupBuilder,
    extractor: Option<UmiExtractor>,
    remove_duplicates: bool,
    state: PartitionState,
    metrics: CollapseMetrics,
    output: Vec<RecordBuf>,
}

impl PartitionReader {
    /// Creates a reader for `partition`.
    #[must_use]
    pub fn new(partition: Partition, options: &CollapseOptions) -> Self {
        let extractor = options.umi_enabled.then(|| UmiExtractor::new(options.umi_delimiter));
        Self {
            partition,
            cache: ReadCache::new(options.group_size, options.max_soft_clip),
            builder: DuplicateGroupBuilder::new(
                options.builder_config(),
                options.defined_umis.clone(),
            ),
            extractor,
            remove_duplicates: options.remove_duplicates,
            state: PartitionState::Idle,
            metrics: CollapseMetrics::default(),
            output: Vec::new(),
        }
    }

    /// The reader's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PartitionState {
        self.state
    }

    /// Slices the partition's region and drains the cache.
    ///
    /// Returns the output records (in emission order) and this partition's
    /// metrics. Any error aborts the run; partial output is never valid.
    pub fn run(
        mut self,
        reader: &mut IndexedBamReader,
        header: &Header,
        partitions: &PartitionList,
        store: &PartitionDataStore,
    ) -> Result<(Vec<RecordBuf>, CollapseMetrics)> {
        self.state = PartitionState::Slicing;

        // Claim reads that neighbors deferred here before this partition ran.
        for info in store.claim(self.partition.index) {
            self.cache.insert_deferred(info);
        }

        let start = Position::try_from(self.partition.start)
            .with_context(|| format!("invalid partition start {}", self.partition.start))?;
        let end = Position::try_from(self.partition.end)
            .with_context(|| format!("invalid partition end {}", self.partition.end))?;
        let region = Region::new(self.partition.reference_name.as_str(), start..=end);

        let query = reader.query(header, &region).with_context(|| {
            format!(
                "Failed to query {}:{}-{}",
                self.partition.reference_name, self.partition.start, self.partition.end
            )
        })?;

        for result in query {
            let record = result.context("Failed to read record")?;
            let record = RecordBuf::try_from_alignment_record(header, &record)
                .context("Failed to decode record")?;
            self.process_record(record, partitions, store);
        }

        self.state = PartitionState::Draining;
        debug!(
            "Partition {} ({}:{}-{}) draining {} cached reads",
            self.partition.index,
            self.partition.reference_name,
            self.partition.start,
            self.partition.end,
            self.cache.len()
        );

        // Late arrivals deferred while this partition was slicing.
        for info in store.claim(self.partition.index) {
            self.cache.insert_deferred(info);
        }

        let batch = self.cache.evict_all();
        self.emit(batch);

        self.metrics.out_of_window_reads = self.cache.out_of_window();
        let stats = self.builder.stats();
        self.metrics.umi_merges = stats.umi_merges;
        self.metrics.duplex_groups = stats.duplex_groups;
        self.metrics.jitter_merges = stats.jitter_merges;
        self.metrics.poly_tail_merges = stats.poly_tail_merges;
        self.metrics.distance_merges = stats.distance_merges;
        self.metrics.unresolved_defined_umis = stats.unresolved_defined_umis;

        self.state = PartitionState::Complete;
        store.mark_complete(self.partition.index);

        Ok((self.output, self.metrics))
    }

    /// Routes one decoded record: pass through, drop, defer, or cache.
    fn process_record(
        &mut self,
        record: RecordBuf,
        partitions: &PartitionList,
        store: &PartitionDataStore,
    ) {
        // The query returns every overlapping record; only records starting
        // inside the region belong to this partition.
        let Some(alignment_start) = record.alignment_start().map(usize::from) else {
            return;
        };
        if alignment_start < self.partition.start || alignment_start > self.partition.end {
            return;
        }

        self.metrics.reads_processed += 1;
        let flags = record.flags();

        // Pre-built consensus reads are never re-grouped.
        if is_consensus_read(&record) {
            self.metrics.consensus_passthrough_reads += 1;
            self.write(record);
            return;
        }

        // Unmapped supplementaries carry no usable evidence: dropped and
        // accounted separately.
        if flags.is_unmapped() && flags.is_supplementary() {
            self.metrics.reads_dropped += 1;
            return;
        }

        // Secondary alignments, unmapped mates-of-mapped reads, and records
        // already marked duplicate bypass the cache unchanged.
        if flags.is_secondary() || flags.is_unmapped() || flags.is_duplicate() {
            self.write(record);
            return;
        }

        let umi = self.extractor.as_mut().and_then(|extractor| {
            let name = record.name()?;
            extractor.extract(&String::from_utf8_lossy(name.as_ref()))
        });
        let coordinates = FragmentCoords::from_read(&record, umi);

        // A fragment anchored in a different partition is resolved by the
        // partition owning the anchor.
        let owner = partitions
            .find(coordinates.anchor_reference(), coordinates.anchor_position())
            .unwrap_or(self.partition.index);
        if owner != self.partition.index {
            // Claimed when the owner runs; if the owner already completed,
            // the end-of-run flush writes it unclassified instead.
            self.metrics.deferred_reads += 1;
            store.defer(owner, ReadInfo::new(record, coordinates));
            return;
        }

        self.cache.process_read(ReadInfo::new(record, coordinates));
        let batch = self.cache.pop_reads();
        self.emit(batch);
    }

    /// Runs the group builder on an emitted batch and applies output policy.
    fn emit(&mut self, batch: FragmentCoordReads) {
        if batch.is_empty() {
            return;
        }
        for fragment in self.builder.build(batch) {
            match fragment {
                Fragment::Single(info) => {
                    self.metrics.singleton_reads += 1;
                    self.write(info.read);
                }
                Fragment::Group(group) => {
                    self.metrics.duplicate_groups += 1;
                    let (records, duplicates, dropped) =
                        group.into_output_reads(self.remove_duplicates);
                    self.metrics.duplicate_reads += duplicates;
                    self.metrics.reads_dropped += dropped;
                    for record in records {
                        self.write(record);
                    }
                }
            }
        }
    }

    fn write(&mut self, record: RecordBuf) {
        self.output.push(record);
    }
}

/// Runs every partition on a fixed worker pool and writes the output.
///
/// Workers pull partitions from a shared queue as they finish; records flow
/// to the single writer through a channel; per-partition metrics merge once
/// at the end. Reads left unclaimed in the store are flushed without a
/// duplicate classification and counted.
///
/// # Errors
/// Any worker or writer error aborts the whole run.
pub fn run_partitioned(
    input: &Path,
    writer: &mut crate::bam_io::BamWriter,
    header: &Header,
    partitions: &PartitionList,
    options: &CollapseOptions,
) -> Result<CollapseMetrics> {
    let store = PartitionDataStore::new();
    let queue: SegQueue<Partition> = SegQueue::new();
    for partition in partitions.iter() {
        queue.push(partition.clone());
    }
    let partition_metrics: SegQueue<CollapseMetrics> = SegQueue::new();
    let (sender, receiver) = mpsc::channel::<Vec<RecordBuf>>();

    let worker_count = options.threads.max(1).min(partitions.len().max(1));
    let mut written: u64 = 0;

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let sender = sender.clone();
            let queue = &queue;
            let store = &store;
            let partition_metrics = &partition_metrics;
            handles.push(scope.spawn(move || -> Result<()> {
                while let Some(partition) = queue.pop() {
                    let (mut reader, _) = create_indexed_bam_reader(input)?;
                    let partition_reader = PartitionReader::new(partition, options);
                    let (records, metrics) =
                        partition_reader.run(&mut reader, header, partitions, store)?;
                    partition_metrics.push(metrics);
                    if sender.send(records).is_err() {
                        break; // writer went away; run is aborting
                    }
                }
                Ok(())
            }));
        }
        drop(sender);

        for batch in receiver {
            for record in &batch {
                writer.write_alignment_record(header, record)?;
                written += 1;
            }
        }

        for handle in handles {
            handle.join().map_err(|_| anyhow!("worker thread panicked"))??;
        }
        Ok(())
    })?;

    let mut total = CollapseMetrics::default();
    while let Some(metrics) = partition_metrics.pop() {
        total.merge(&metrics);
    }
    total.reads_written = written;

    // Reads no partition ever claimed (mate never observed, or deferred to a
    // partition that had already completed) are written unclassified.
    for info in store.drain_unresolved() {
        writer.write_alignment_record(header, &info.read)?;
        total.unresolved_reads += 1;
        total.reads_written += 1;
    }

    total.check_integrity();
    Ok(total)
}
