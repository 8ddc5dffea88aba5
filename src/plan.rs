//! Partition planning for a distributed store build
//!
//! The planner turns per-file count sidecars and a memory budget into two
//! independent maps, computed once and persisted as `store/plan` so that
//! every bucketizer, sorter, and indexer process (each launched separately
//! by an external scheduler) shares one view of the partitioning:
//!
//! - **file → bucket**: whole input files are dealt to buckets by always
//!   picking the currently least-loaded bucket, balancing bucketization
//!   work. Decoupled from slice assignment.
//! - **read ID → slice**: reads are walked in ID order, accumulating
//!   their (mirrored) overlap counts into the current slice until the
//!   next read would overflow the per-slice budget. Slices are therefore
//!   contiguous, ordered, non-overlapping ID ranges, and a read's
//!   overlaps never span two slices.
//!
//! One read whose overlaps alone exceed the budget cannot be split; the
//! planner raises the budget to that read's footprint and warns.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{info, warn};

use crate::error::{FormatError, PlanError, Result};
use crate::names;
use crate::overlap::{Overlap, RecordLayout};
use crate::ovl::OverlapCounts;

/// Plan file magic: "OVL:PLAN" in ASCII (little-endian)
const MAGIC: u64 = 0x4e414c503a4c564f;

/// Current plan format version
const VERSION: u8 = 1;

/// Most buckets a build will use by default
const DEFAULT_MAX_BUCKETS: u32 = 512;

/// Inputs to the planner.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Largest read ID any overlap may name
    pub max_id: u32,
    /// Record layout of the store being built
    pub layout: RecordLayout,
    /// Memory budget for one sorter process, in bytes
    pub memory_limit: u64,
    /// Bucket count override; defaults to one bucket per input file,
    /// capped at 512
    pub num_buckets: Option<u32>,
}

/// The persisted partition plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    max_id: u32,
    read_len_bits: u32,
    /// Effective per-slice budget in records, after any auto-raise
    slice_budget: u64,
    inputs: Vec<PathBuf>,
    file_to_bucket: Vec<u32>,
    num_buckets: u32,
    /// `slice_bgn[s]..slice_bgn[s + 1]` is slice `s`'s ID range;
    /// the final entry is `max_id + 1`
    slice_bgn: Vec<u32>,
}

impl PartitionPlan {
    /// Computes a plan from the inputs' count sidecars.
    ///
    /// Fails if an input or its sidecar is missing, or if a sidecar was
    /// built for a different `max_id`.
    pub fn compute<P: AsRef<Path>>(config: &PlanConfig, inputs: &[P]) -> Result<Self> {
        if inputs.is_empty() {
            return Err(PlanError::NoInputs.into());
        }

        // Sum the sidecars into one per-read total.
        let mut totals = OverlapCounts::new(config.max_id);
        let mut file_totals = Vec::with_capacity(inputs.len());
        for input in inputs {
            let input = input.as_ref();
            let sidecar = names::counts_sidecar(input);
            if !input.is_file() || !sidecar.is_file() {
                return Err(PlanError::MissingInput(input.display().to_string()).into());
            }
            let counts = OverlapCounts::load(&sidecar)?;
            if counts.max_id() != config.max_id {
                return Err(PlanError::MissingInput(format!(
                    "{}: sidecar covers reads to {}, expected {}",
                    sidecar.display(),
                    counts.max_id(),
                    config.max_id
                ))
                .into());
            }
            file_totals.push(counts.total());
            totals.accumulate(&counts);
        }

        let record_bytes = std::mem::size_of::<Overlap>() as u64;
        let mut slice_budget = (config.memory_limit / record_bytes).max(1);
        let max_per_read = u64::from(totals.max_per_read());

        info!(
            "planning store: {} overlaps over {} reads from {} files; budget {} records/slice",
            totals.total(),
            config.max_id,
            inputs.len(),
            slice_budget
        );

        // One read's overlaps cannot span two slices; if a single read
        // outgrows the budget, the budget moves, not the read.
        if max_per_read > slice_budget {
            warn!(
                "read with {max_per_read} overlaps exceeds the {slice_budget}-record budget; \
                 raising the per-slice budget (sorting will need more memory)"
            );
            slice_budget = max_per_read;
        }

        let slice_bgn = assign_slices(&totals, config.max_id, slice_budget);
        let (file_to_bucket, num_buckets) = assign_buckets(
            &file_totals,
            config
                .num_buckets
                .unwrap_or_else(|| (inputs.len() as u32).clamp(1, DEFAULT_MAX_BUCKETS)),
        );

        info!(
            "planned {} slices and {} buckets",
            slice_bgn.len() - 1,
            num_buckets
        );

        Ok(Self {
            max_id: config.max_id,
            read_len_bits: config.layout.read_len_bits(),
            slice_budget,
            inputs: inputs.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            file_to_bucket,
            num_buckets,
            slice_bgn,
        })
    }

    /// Largest read ID covered by the plan
    #[must_use]
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// The record layout the store is being built with
    #[must_use]
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.read_len_bits)
    }

    /// Effective per-slice budget in records (after any auto-raise)
    #[must_use]
    pub fn slice_budget(&self) -> u64 {
        self.slice_budget
    }

    /// Number of bucketizer jobs to launch
    #[must_use]
    pub fn num_buckets(&self) -> u32 {
        self.num_buckets
    }

    /// Number of sorter jobs to launch
    #[must_use]
    pub fn num_slices(&self) -> u32 {
        (self.slice_bgn.len() - 1) as u32
    }

    /// The input files, in the caller's original order
    #[must_use]
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Input files assigned to `bucket`
    pub fn files_in_bucket(&self, bucket: u32) -> impl Iterator<Item = &Path> {
        self.inputs
            .iter()
            .zip(&self.file_to_bucket)
            .filter(move |(_, &b)| b == bucket)
            .map(|(path, _)| path.as_path())
    }

    /// Slice owning read `id`
    #[must_use]
    pub fn slice_for_read(&self, id: u32) -> u32 {
        debug_assert!(id >= 1 && id <= self.max_id);
        (self.slice_bgn.partition_point(|&bgn| bgn <= id) - 1) as u32
    }

    /// Inclusive ID range `[bgn, end]` of `slice`
    #[must_use]
    pub fn slice_range(&self, slice: u32) -> (u32, u32) {
        let s = slice as usize;
        (self.slice_bgn[s], self.slice_bgn[s + 1] - 1)
    }

    /// Persists the plan into the store directory
    pub fn save(&self, store: &Path) -> Result<()> {
        let mut writer = File::create(names::plan(store)).map(BufWriter::new)?;

        writer.write_u64::<LittleEndian>(MAGIC)?;
        writer.write_u8(VERSION)?;
        writer.write_u32::<LittleEndian>(self.max_id)?;
        writer.write_u32::<LittleEndian>(self.read_len_bits)?;
        writer.write_u64::<LittleEndian>(self.slice_budget)?;
        writer.write_u32::<LittleEndian>(self.num_buckets)?;
        writer.write_u32::<LittleEndian>(self.inputs.len() as u32)?;
        writer.write_u32::<LittleEndian>(self.num_slices())?;

        for (path, &bucket) in self.inputs.iter().zip(&self.file_to_bucket) {
            let bytes = path.to_string_lossy();
            let bytes = bytes.as_bytes();
            writer.write_u32::<LittleEndian>(bucket)?;
            writer.write_u16::<LittleEndian>(bytes.len() as u16)?;
            writer.write_all(bytes)?;
        }
        for &bgn in &self.slice_bgn {
            writer.write_u32::<LittleEndian>(bgn)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Loads the plan persisted in the store directory
    pub fn load(store: &Path) -> Result<Self> {
        let mut reader = File::open(names::plan(store)).map(BufReader::new)?;

        let magic = reader.read_u64::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(FormatError::InvalidMagicNumber(magic).into());
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(FormatError::InvalidFormatVersion(u64::from(version)).into());
        }

        let max_id = reader.read_u32::<LittleEndian>()?;
        let read_len_bits = reader.read_u32::<LittleEndian>()?;
        let slice_budget = reader.read_u64::<LittleEndian>()?;
        let num_buckets = reader.read_u32::<LittleEndian>()?;
        let num_files = reader.read_u32::<LittleEndian>()?;
        let num_slices = reader.read_u32::<LittleEndian>()?;

        let mut inputs = Vec::with_capacity(num_files as usize);
        let mut file_to_bucket = Vec::with_capacity(num_files as usize);
        for _ in 0..num_files {
            file_to_bucket.push(reader.read_u32::<LittleEndian>()?);
            let len = reader.read_u16::<LittleEndian>()?;
            let mut bytes = vec![0u8; len as usize];
            reader.read_exact(&mut bytes)?;
            inputs.push(PathBuf::from(String::from_utf8_lossy(&bytes).into_owned()));
        }

        let mut slice_bgn = Vec::with_capacity(num_slices as usize + 1);
        for _ in 0..=num_slices {
            slice_bgn.push(reader.read_u32::<LittleEndian>()?);
        }

        Ok(Self {
            max_id,
            read_len_bits,
            slice_budget,
            inputs,
            file_to_bucket,
            num_buckets,
            slice_bgn,
        })
    }
}

/// Walks reads in ID order, closing a slice whenever the next read would
/// overflow the budget. Returns the slice boundary array.
fn assign_slices(totals: &OverlapCounts, max_id: u32, budget: u64) -> Vec<u32> {
    let mut slice_bgn = vec![1u32];
    let mut current = 0u64;

    for id in 1..=max_id {
        let count = u64::from(totals.count(id));
        if current > 0 && current + count > budget {
            slice_bgn.push(id);
            current = 0;
        }
        current += count;
    }

    slice_bgn.push(max_id + 1);
    slice_bgn
}

/// Deals files to buckets, always picking the least-loaded bucket
fn assign_buckets(file_totals: &[u64], num_buckets: u32) -> (Vec<u32>, u32) {
    let num_buckets = num_buckets.clamp(1, file_totals.len() as u32);
    let mut loads = vec![0u64; num_buckets as usize];
    let mut assignment = Vec::with_capacity(file_totals.len());

    for &total in file_totals {
        let bucket = loads
            .iter()
            .enumerate()
            .min_by_key(|(_, &load)| load)
            .map(|(b, _)| b)
            .unwrap_or(0);
        loads[bucket] += total;
        assignment.push(bucket as u32);
    }

    (assignment, num_buckets)
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::ovl::{OvlFileWriterBuilder, RecordKind};
    use tempfile::TempDir;

    /// Writes a producer file whose reads each get `per_read` overlaps
    /// against distinct partners
    fn write_input(dir: &Path, name: &str, reads: std::ops::RangeInclusive<u32>, max_id: u32) {
        let path = dir.join(name);
        let mut writer = OvlFileWriterBuilder::default()
            .kind(RecordKind::Full)
            .layout(RecordLayout::new(16))
            .counts(max_id)
            .create(&path)
            .unwrap();
        for a in reads {
            let b = if a == max_id { 1 } else { a + 1 };
            writer
                .write_overlap(&Overlap {
                    a_id: a,
                    b_id: b,
                    span: 500,
                    ..Overlap::default()
                })
                .unwrap();
        }
        writer.finish().unwrap();
    }

    fn record_bytes() -> u64 {
        std::mem::size_of::<Overlap>() as u64
    }

    #[test]
    fn test_slices_partition_id_space() {
        let dir = TempDir::new().unwrap();
        write_input(dir.path(), "a.ovl", 1..=400, 1000);
        write_input(dir.path(), "b.ovl", 401..=1000, 1000);

        let config = PlanConfig {
            max_id: 1000,
            layout: RecordLayout::new(16),
            memory_limit: 300 * record_bytes(),
            num_buckets: None,
        };
        let plan =
            PartitionPlan::compute(&config, &[dir.path().join("a.ovl"), dir.path().join("b.ovl")])
                .unwrap();

        assert!(plan.num_slices() > 1);

        // Contiguous, ordered, gap-free coverage of 1..=max_id.
        let mut next = 1;
        for s in 0..plan.num_slices() {
            let (bgn, end) = plan.slice_range(s);
            assert_eq!(bgn, next);
            assert!(end >= bgn);
            for id in bgn..=end {
                assert_eq!(plan.slice_for_read(id), s);
            }
            next = end + 1;
        }
        assert_eq!(next, 1001);
    }

    #[test]
    fn test_budget_respected() {
        let dir = TempDir::new().unwrap();
        write_input(dir.path(), "a.ovl", 1..=500, 500);

        let budget_records = 100u64;
        let config = PlanConfig {
            max_id: 500,
            layout: RecordLayout::new(16),
            memory_limit: budget_records * record_bytes(),
            num_buckets: None,
        };
        let plan = PartitionPlan::compute(&config, &[dir.path().join("a.ovl")]).unwrap();

        let counts = OverlapCounts::load(names::counts_sidecar(&dir.path().join("a.ovl"))).unwrap();
        for s in 0..plan.num_slices() {
            let (bgn, end) = plan.slice_range(s);
            let total: u64 = (bgn..=end).map(|id| u64::from(counts.count(id))).sum();
            assert!(total <= plan.slice_budget(), "slice {s} holds {total}");
        }
    }

    #[test]
    fn test_oversized_read_raises_budget() {
        let dir = TempDir::new().unwrap();
        let max_id = 20_000;
        let path = dir.path().join("hub.ovl");

        // Read 1 overlaps 10,000 partners: 10,000 records keyed by read 1.
        let mut writer = OvlFileWriterBuilder::default()
            .kind(RecordKind::Full)
            .layout(RecordLayout::new(16))
            .counts(max_id)
            .create(&path)
            .unwrap();
        for b in 2..=10_001 {
            writer
                .write_overlap(&Overlap {
                    a_id: 1,
                    b_id: b,
                    span: 100,
                    ..Overlap::default()
                })
                .unwrap();
        }
        writer.finish().unwrap();

        // Budget nominally caps a slice at 5,000 records.
        let config = PlanConfig {
            max_id,
            layout: RecordLayout::new(16),
            memory_limit: 5000 * record_bytes(),
            num_buckets: None,
        };
        let plan = PartitionPlan::compute(&config, &[path]).unwrap();

        assert!(plan.slice_budget() >= 10_000);
        let (bgn, end) = plan.slice_range(plan.slice_for_read(1));
        assert_eq!(bgn, 1);
        assert!(end >= 1);
    }

    #[test]
    fn test_buckets_balance_by_load() {
        let totals = [100, 10, 10, 10, 70, 10];
        let (assignment, num_buckets) = assign_buckets(&totals, 2);
        assert_eq!(num_buckets, 2);

        let mut loads = [0u64; 2];
        for (i, &b) in assignment.iter().enumerate() {
            loads[b as usize] += totals[i];
        }
        // Greedy least-loaded keeps the split near even.
        assert!(loads[0].abs_diff(loads[1]) <= 100);
    }

    #[test]
    fn test_plan_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        std::fs::create_dir(&store).unwrap();
        write_input(dir.path(), "a.ovl", 1..=100, 100);

        let config = PlanConfig {
            max_id: 100,
            layout: RecordLayout::new(16),
            memory_limit: 64 << 20,
            num_buckets: None,
        };
        let plan = PartitionPlan::compute(&config, &[dir.path().join("a.ovl")]).unwrap();
        plan.save(&store).unwrap();

        let back = PartitionPlan::load(&store).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn test_missing_sidecar_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("naked.ovl");
        std::fs::write(&path, b"not a sidecar").unwrap();

        let config = PlanConfig {
            max_id: 10,
            layout: RecordLayout::new(16),
            memory_limit: 64 << 20,
            num_buckets: None,
        };
        assert!(PartitionPlan::compute(&config, &[path]).is_err());
    }
}
