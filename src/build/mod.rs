//! # build
//!
//! The distributed construction pipeline. Four stages, each runnable as
//! an independent OS process, coordinating only through files in the
//! store directory:
//!
//! 1. [`bucketize`](bucketizer::bucketize): one job per bucket. Mirror,
//!    filter, and partition raw overlaps into per-slice files.
//! 2. [`sort_slice`](sorter::sort_slice): one job per slice. Gather the
//!    slice's partitions from every bucket, sort in memory, and emit
//!    piece files with a local index.
//! 3. [`merge_store`](indexer::merge_store): once, after all slices.
//!    Stitch the per-slice indices, infos, and statistics into the final
//!    store and optionally remove the intermediates.
//! 4. [`StoreWriter`](writer::StoreWriter): the single-process
//!    alternative for small stores fed with already-sorted overlaps.
//!
//! Completion is signalled purely through artifact state: a bucket is
//! done when its directory has been renamed from `.WORKING`, a slice is
//! done when its info/index files exist and its sentinel is gone. A
//! finished job short-circuits cleanly when rerun; an in-flight one
//! refuses to rerun without `force`.

pub mod bucketizer;
pub mod indexer;
pub mod sorter;
pub mod writer;

pub use bucketizer::{bucketize, BucketizeConfig};
pub use indexer::merge_store;
pub use sorter::{sort_slice, SortConfig};
pub use writer::StoreWriter;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ReadError, Result};

/// How a rerunnable job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran and produced its outputs
    Built,
    /// A previous run already completed; nothing was written
    AlreadyDone,
}

/// Writes a bucket's per-slice overlap counts (`sliceSizes`)
pub(crate) fn write_slice_sizes(path: &Path, sizes: &[u64]) -> Result<()> {
    let mut writer = File::create(path).map(BufWriter::new)?;
    for &size in sizes {
        writer.write_u64::<LittleEndian>(size)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a bucket's `sliceSizes`, verifying one entry per slice
pub(crate) fn read_slice_sizes(path: &Path, num_slices: u32) -> Result<Vec<u64>> {
    let file = File::open(path)?;
    let bytes = file.metadata()?.len();
    if bytes != u64::from(num_slices) * 8 {
        return Err(ReadError::ShortFile {
            path: path.display().to_string(),
            expected: u64::from(num_slices),
            found: bytes / 8,
        }
        .into());
    }

    let mut reader = BufReader::new(file);
    let mut sizes = vec![0u64; num_slices as usize];
    reader.read_u64_into::<LittleEndian>(&mut sizes)?;
    Ok(sizes)
}
