//! Per-slice sort: the gather half of the external sort
//!
//! One sorter job owns one slice. It collects the slice's partition file
//! from every completed bucket, verifies the counts promised by each
//! bucket's `sliceSizes`, sorts everything in one flat buffer, and
//! streams the result into piece files. This is the single point in the
//! pipeline where a read's overlaps become contiguous and ordered.
//!
//! Piece files roll over at a size threshold, but only at a read-ID
//! boundary: one read's run is never split across pieces. The slice's
//! dense local index, info, and statistics are built concurrently with
//! the output.
//!
//! A sentinel file (`SSSS.sorting`) exists exactly while the job is in
//! flight. Finished outputs with no sentinel make a rerun a clean no-op;
//! a sentinel left behind by a crash blocks reruns until forced.

use std::fs;
use std::path::Path;

use log::info;

use crate::error::{BuildError, Result};
use crate::histogram::OverlapHistogram;
use crate::index::IndexAccumulator;
use crate::info::StoreInfo;
use crate::names;
use crate::overlap::Overlap;
use crate::ovl::{OvlFileReader, OvlFileWriterBuilder, RecordKind};
use crate::plan::PartitionPlan;
use crate::readlen::ReadLengths;

use super::{read_slice_sizes, JobOutcome};

/// Default records per piece file: 1 GiB of Normal records at the
/// widest supported layout
const DEFAULT_PIECE_RECORDS: u64 = (1 << 30) / 28;

/// Settings for one sorter job.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Slice number this job owns
    pub slice: u32,
    /// Records per piece before rolling at the next read boundary
    pub piece_records: u64,
    /// Restart a job that crashed mid-run
    pub force: bool,
}

impl SortConfig {
    /// Defaults: 1 GiB pieces, no force
    #[must_use]
    pub fn new(slice: u32) -> Self {
        Self {
            slice,
            piece_records: DEFAULT_PIECE_RECORDS,
            force: false,
        }
    }
}

/// Runs one sorter job against a planned store directory.
pub fn sort_slice<L: ReadLengths>(
    store: &Path,
    plan: &PartitionPlan,
    lengths: &L,
    config: &SortConfig,
) -> Result<JobOutcome> {
    let slice = config.slice;
    let sentinel = names::sorting_sentinel(store, slice);
    let info_path = names::slice_info(store, slice);
    let index_path = names::slice_index(store, slice);

    // Outputs present and no sentinel: a previous run completed.
    if info_path.is_file() && index_path.is_file() && !sentinel.exists() {
        info!("slice {slice}: already sorted, nothing to do");
        return Ok(JobOutcome::AlreadyDone);
    }

    // A leftover sentinel marks a crashed run.
    if sentinel.exists() && !config.force {
        return Err(BuildError::CrashedRun(format!("{slice:04}.sorting")).into());
    }
    fs::write(&sentinel, b"")?;

    // Sum this slice's share of every bucket. Buckets publish by rename,
    // so a missing directory means bucketizing has not finished.
    let mut bucket_counts = Vec::with_capacity(plan.num_buckets() as usize);
    let mut total = 0u64;
    for bucket in 0..plan.num_buckets() {
        let dir = names::bucket_dir(store, bucket);
        if !dir.is_dir() {
            return Err(BuildError::BucketNotFinished(bucket).into());
        }
        let sizes = read_slice_sizes(&names::slice_sizes(&dir), plan.num_slices())?;
        bucket_counts.push(sizes[slice as usize]);
        total += sizes[slice as usize];
    }

    let record_bytes = std::mem::size_of::<Overlap>() as u64;
    if total > plan.slice_budget() {
        return Err(BuildError::SliceExceedsBudget {
            slice,
            needed: total * record_bytes,
            budget: plan.slice_budget() * record_bytes,
        }
        .into());
    }

    info!("slice {slice}: loading {total} overlaps from {} buckets", plan.num_buckets());

    // One flat buffer for the whole slice.
    let layout = plan.layout();
    let mut overlaps: Vec<Overlap> = Vec::with_capacity(total as usize);
    for bucket in 0..plan.num_buckets() {
        let expected = bucket_counts[bucket as usize];
        if expected == 0 {
            continue;
        }

        let path = names::slice_file(&names::bucket_dir(store, bucket), slice);
        let mut reader = OvlFileReader::open_expecting(&path, layout)?;
        let mut ovl = Overlap::default();
        let mut loaded = 0u64;
        while reader.read_overlap(&mut ovl)? {
            overlaps.push(ovl);
            loaded += 1;
        }

        if loaded != expected {
            return Err(BuildError::SliceCountMismatch {
                bucket,
                slice,
                expected,
                found: loaded,
            }
            .into());
        }
    }

    overlaps.sort_unstable();

    // Stream the sorted buffer into pieces, building index, info, and
    // statistics as records go by.
    let (bgn_id, end_id) = plan.slice_range(slice);
    let mut acc = IndexAccumulator::new(bgn_id, end_id);
    let mut slice_info = StoreInfo::new(layout, plan.max_id());
    let mut hist = OverlapHistogram::new(plan.max_id(), lengths.max_read_length());

    let mut piece: u32 = 1;
    let mut piece_written = 0u64;
    let mut writer = OvlFileWriterBuilder::default()
        .kind(RecordKind::Normal)
        .layout(layout)
        .create(names::piece(store, slice, piece))?;
    let mut last_a = 0u32;

    for ovl in &overlaps {
        // Roll to a new piece only once the current read's run is closed.
        if piece_written >= config.piece_records && ovl.a_id != last_a {
            writer.finish()?;
            piece += 1;
            piece_written = 0;
            writer = OvlFileWriterBuilder::default()
                .kind(RecordKind::Normal)
                .layout(layout)
                .create(names::piece(store, slice, piece))?;
        }

        writer.write_overlap(ovl)?;
        acc.add_overlap(ovl.a_id, slice as u16, piece as u16, piece_written as u32);
        slice_info.add_overlaps(ovl.a_id, 1);
        hist.add_overlap(ovl, lengths);

        piece_written += 1;
        last_a = ovl.a_id;
    }
    writer.finish()?;
    hist.finish();

    crate::index::save_index(&index_path, &acc.finish())?;
    hist.save(names::slice_statistics(store, slice))?;
    slice_info.save(&info_path)?;

    fs::remove_file(&sentinel)?;

    info!(
        "slice {slice}: sorted {total} overlaps for reads {bgn_id}..={end_id} into {piece} piece(s)"
    );
    Ok(JobOutcome::Built)
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::build::bucketizer::{bucketize, BucketizeConfig};
    use crate::index::load_index;
    use crate::overlap::RecordLayout;
    use crate::ovl::OvlFileWriter;
    use crate::plan::{PartitionPlan, PlanConfig};
    use crate::readlen::MemoryReadLengths;
    use std::io::BufWriter;
    use tempfile::TempDir;

    const MAX_ID: u32 = 50;

    fn producer(path: &Path) -> OvlFileWriter<BufWriter<std::fs::File>> {
        OvlFileWriterBuilder::default()
            .kind(RecordKind::Full)
            .layout(RecordLayout::new(16))
            .counts(MAX_ID)
            .create(path)
            .unwrap()
    }

    fn usable(a: u32, b: u32, span: u32) -> Overlap {
        Overlap {
            a_id: a,
            b_id: b,
            span,
            for_utg: true,
            ..Overlap::default()
        }
    }

    /// Plans and bucketizes a small input set, returning the plan
    fn prepare(store: &Path, inputs: &[std::path::PathBuf]) -> PartitionPlan {
        let plan = PartitionPlan::compute(
            &PlanConfig {
                max_id: MAX_ID,
                layout: RecordLayout::new(16),
                memory_limit: 64 << 20,
                num_buckets: None,
            },
            inputs,
        )
        .unwrap();
        for bucket in 0..plan.num_buckets() {
            bucketize(store, &plan, &BucketizeConfig::new(bucket)).unwrap();
        }
        plan
    }

    #[test]
    fn test_sort_orders_and_indexes() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        std::fs::create_dir(&store).unwrap();

        let input = dir.path().join("in.ovl");
        let mut writer = producer(&input);
        // Deliberately unsorted input.
        for (a, b) in [(9, 3), (2, 7), (9, 1), (5, 9)] {
            writer.write_overlap(&usable(a, b, 400)).unwrap();
        }
        writer.finish().unwrap();

        let plan = prepare(&store, &[input]);
        assert_eq!(plan.num_slices(), 1);

        let lengths = MemoryReadLengths::uniform(MAX_ID, 1000);
        let outcome = sort_slice(&store, &plan, &lengths, &SortConfig::new(0)).unwrap();
        assert_eq!(outcome, JobOutcome::Built);

        // 4 raw overlaps mirrored = 8 records; read 9 owns three of them.
        let (bgn, end) = plan.slice_range(0);
        let entries =
            load_index(names::slice_index(&store, 0), Some(u64::from(end - bgn + 1))).unwrap();
        let total: u64 = entries.iter().map(|e| u64::from(e.num_olaps)).sum();
        assert_eq!(total, 8);
        assert_eq!(entries[(9 - bgn) as usize].num_olaps, 3);

        // The piece holds records sorted by (implied) a-read.
        let info = StoreInfo::load(names::slice_info(&store, 0)).unwrap();
        assert_eq!(info.num_overlaps(), 8);
        assert!(!names::sorting_sentinel(&store, 0).exists());
    }

    #[test]
    fn test_rerun_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        std::fs::create_dir(&store).unwrap();

        let input = dir.path().join("in.ovl");
        let mut writer = producer(&input);
        writer.write_overlap(&usable(1, 2, 400)).unwrap();
        writer.finish().unwrap();

        let plan = prepare(&store, &[input]);
        let lengths = MemoryReadLengths::uniform(MAX_ID, 1000);

        assert_eq!(
            sort_slice(&store, &plan, &lengths, &SortConfig::new(0)).unwrap(),
            JobOutcome::Built
        );
        assert_eq!(
            sort_slice(&store, &plan, &lengths, &SortConfig::new(0)).unwrap(),
            JobOutcome::AlreadyDone
        );
    }

    #[test]
    fn test_crashed_run_needs_force() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        std::fs::create_dir(&store).unwrap();

        let input = dir.path().join("in.ovl");
        let mut writer = producer(&input);
        writer.write_overlap(&usable(1, 2, 400)).unwrap();
        writer.finish().unwrap();

        let plan = prepare(&store, &[input]);
        let lengths = MemoryReadLengths::uniform(MAX_ID, 1000);

        // Fake a crash: sentinel without outputs.
        std::fs::write(names::sorting_sentinel(&store, 0), b"").unwrap();

        assert!(sort_slice(&store, &plan, &lengths, &SortConfig::new(0)).is_err());

        let forced = SortConfig {
            force: true,
            ..SortConfig::new(0)
        };
        assert_eq!(
            sort_slice(&store, &plan, &lengths, &forced).unwrap(),
            JobOutcome::Built
        );
    }

    #[test]
    fn test_pieces_never_split_a_read() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        std::fs::create_dir(&store).unwrap();

        let input = dir.path().join("in.ovl");
        let mut writer = producer(&input);
        // Read 10 gets a long run; partners are far away so the mirrored
        // records don't interleave with it.
        for b in 30..40 {
            writer.write_overlap(&usable(10, b, 400)).unwrap();
        }
        writer.write_overlap(&usable(11, 41, 400)).unwrap();
        writer.finish().unwrap();

        let plan = prepare(&store, &[input]);
        let lengths = MemoryReadLengths::uniform(MAX_ID, 1000);

        // Tiny pieces force several rollovers.
        let config = SortConfig {
            piece_records: 3,
            ..SortConfig::new(0)
        };
        sort_slice(&store, &plan, &lengths, &config).unwrap();

        let (bgn, end) = plan.slice_range(0);
        let entries =
            load_index(names::slice_index(&store, 0), Some(u64::from(end - bgn + 1))).unwrap();

        // Read 10's run of 10 records lives in exactly one piece even
        // though the piece limit is 3.
        let entry = entries[(10 - bgn) as usize];
        assert_eq!(entry.num_olaps, 10);
        let piece_path = names::piece(&store, 0, u32::from(entry.piece));
        let mut reader = OvlFileReader::open(&piece_path).unwrap();
        reader.seek_overlap(u64::from(entry.offset)).unwrap();
        let mut ovl = Overlap::default();
        for _ in 0..entry.num_olaps {
            assert!(reader.read_overlap(&mut ovl).unwrap());
        }
    }

    #[test]
    fn test_budget_overflow_fails_fast() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        std::fs::create_dir(&store).unwrap();

        let input = dir.path().join("in.ovl");
        let mut writer = producer(&input);
        for b in 2..20 {
            writer.write_overlap(&usable(1, b, 400)).unwrap();
        }
        writer.finish().unwrap();

        let plan = prepare(&store, &[input]);
        let lengths = MemoryReadLengths::uniform(MAX_ID, 1000);

        // Corrupt a bucket's sliceSizes to claim far more data than the
        // plan budgeted for; the sorter must refuse before loading.
        let sizes_path = names::slice_sizes(&names::bucket_dir(&store, 0));
        let mut sizes = read_slice_sizes(&sizes_path, plan.num_slices()).unwrap();
        sizes[0] = plan.slice_budget() + 1;
        super::super::write_slice_sizes(&sizes_path, &sizes).unwrap();

        let err = sort_slice(&store, &plan, &lengths, &SortConfig::new(0)).unwrap_err();
        assert!(err.to_string().contains("budget"));
    }
}
