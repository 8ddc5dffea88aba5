//! Final merge: stitching slices into one store
//!
//! The merge runs once, after every sorter job has finished. It refuses
//! to run otherwise, enumerating the slices that are missing. Slices
//! were sorted independently and in parallel, so each slice's local
//! `overlap_id` cursors start at zero; the merge offsets them by the
//! cumulative overlap count of all numerically earlier slices, which
//! fixes a stable global ordering over every overlap in the store. The
//! running total is cross-checked against each read's cursor as the
//! index is stitched.
//!
//! Per-slice statistics merge into the store-wide `statistics` file, and
//! the intermediates (bucket directories, per-slice info/index/
//! statistics) can be deleted once the merge has been verified.

use std::fs;
use std::path::Path;

use log::info;

use crate::error::{BuildError, Result};
use crate::histogram::OverlapHistogram;
use crate::index::{load_index, save_index, IndexEntry};
use crate::info::StoreInfo;
use crate::names;
use crate::plan::PartitionPlan;
use crate::readlen::ReadLengths;

/// Merges all slice outputs into the final info, index, and statistics.
///
/// With `cleanup` set, bucket directories and per-slice files are
/// removed after the merged store has been written.
pub fn merge_store<L: ReadLengths>(
    store: &Path,
    plan: &PartitionPlan,
    lengths: &L,
    cleanup: bool,
) -> Result<()> {
    // Every slice must have published its outputs.
    let missing: Vec<u32> = (0..plan.num_slices())
        .filter(|&s| {
            !names::slice_info(store, s).is_file()
                || !names::slice_index(store, s).is_file()
                || names::sorting_sentinel(store, s).exists()
        })
        .collect();
    if !missing.is_empty() {
        return Err(BuildError::SlicesMissing(missing.len(), missing).into());
    }

    let layout = plan.layout();
    let mut info = StoreInfo::new(layout, plan.max_id());
    let mut hist = OverlapHistogram::new(plan.max_id(), lengths.max_read_length());

    // Read ID 0 never has overlaps; its entry is a placeholder.
    let mut entries: Vec<IndexEntry> = Vec::with_capacity(plan.max_id() as usize + 1);
    entries.push(IndexEntry::default());

    let mut running_total = 0u64;
    let mut checked_total = 0u64;

    for slice in 0..plan.num_slices() {
        let slice_info = StoreInfo::load(names::slice_info(store, slice))?;
        slice_info.require_layout(layout)?;

        let (bgn, end) = plan.slice_range(slice);
        let slice_entries = load_index(
            names::slice_index(store, slice),
            Some(u64::from(end - bgn + 1)),
        )?;

        // Shift local cursors into the global ordering and verify each
        // occupied entry against the running total as we go.
        for mut entry in slice_entries {
            entry.overlap_id += running_total;
            if entry.num_olaps > 0 && entry.overlap_id != checked_total {
                return Err(BuildError::CursorMismatch {
                    id: entries.len() as u32,
                    cursor: entry.overlap_id,
                    total: checked_total,
                }
                .into());
            }
            checked_total += u64::from(entry.num_olaps);
            entries.push(entry);
        }

        running_total += slice_info.num_overlaps();
        info.merge_counts(&slice_info);

        let slice_hist = OverlapHistogram::load(names::slice_statistics(store, slice))?;
        hist.merge(&slice_hist)?;

        info!(
            "merged slice {slice}: reads {bgn}..={end}, {} overlaps (total {})",
            slice_info.num_overlaps(),
            info.num_overlaps()
        );
    }

    // Partition completeness: the stitched entries must account for
    // every overlap each slice reported.
    let entry_total: u64 = entries.iter().map(|e| u64::from(e.num_olaps)).sum();
    if entry_total != info.num_overlaps() {
        return Err(BuildError::CursorMismatch {
            id: plan.max_id(),
            cursor: entry_total,
            total: info.num_overlaps(),
        }
        .into());
    }

    save_index(names::index(store), &entries)?;
    hist.save(names::statistics(store))?;

    info.mark_complete();
    info.save(names::info(store))?;

    info!(
        "store sealed: {} overlaps for reads {}..={}",
        info.num_overlaps(),
        info.bgn_id(),
        info.end_id()
    );

    if cleanup {
        remove_intermediates(store, plan)?;
    }
    Ok(())
}

/// Deletes bucket directories and per-slice outputs after a verified merge
fn remove_intermediates(store: &Path, plan: &PartitionPlan) -> Result<()> {
    for bucket in 0..plan.num_buckets() {
        let dir = names::bucket_dir(store, bucket);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
    }
    for slice in 0..plan.num_slices() {
        for path in [
            names::slice_info(store, slice),
            names::slice_index(store, slice),
            names::slice_statistics(store, slice),
        ] {
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
    }
    info!("removed intermediate bucket and slice files");
    Ok(())
}
