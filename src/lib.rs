//! # ovlstore
//!
//! An out-of-core, sharded binary store for pairwise sequence-overlap
//! records produced during genome assembly. For every sequencing read
//! the store answers three questions fast: *all overlaps naming this
//! read* (one contiguous seek), *every overlap in ID order* (sequential
//! streaming), and *how do I build this from hundreds of unsorted
//! producer files that dwarf memory* (a crash-resumable, memory-budgeted
//! external sort run as independent OS processes).
//!
//! ## Construction
//!
//! ```text
//! producer files (+ .counts sidecars)
//!        │
//!        ▼
//!   PartitionPlan ──────────────┐ persisted once, read by every job
//!        │                      │
//!   bucketize (xN jobs)         │
//!        │  bucketNNNN/sliceNNNN│
//!   sort_slice (xM jobs)        │
//!        │  SSSS-PPP + local index
//!   merge_store (once) ◄────────┘
//!        │
//!   info / index / statistics   → StoreReader
//! ```
//!
//! Jobs coordinate purely through the filesystem: a bucket publishes by
//! atomically renaming its working directory, a sorter by removing its
//! sentinel. Rerunning a finished job is a detected no-op; rerunning a
//! crashed one requires `force`. Small stores can skip the pipeline and
//! use [`build::StoreWriter`] with pre-sorted input.
//!
//! ## Reading
//!
//! ```no_run
//! use ovlstore::{Overlap, StoreReader};
//!
//! fn main() -> ovlstore::Result<()> {
//!     let mut reader = StoreReader::open("asm.ovlStore")?;
//!
//!     // Random access: one read's contiguous run.
//!     let mut run = Vec::new();
//!     let n = reader.load_overlaps_for_read(1542, &mut run)?;
//!     println!("read 1542 has {n} overlaps");
//!
//!     // Sequential streaming over an ID range.
//!     reader.set_range(1, 10_000);
//!     let mut ovl = Overlap::default();
//!     while reader.read_overlap(&mut ovl)? {
//!         // ...
//!     }
//!     Ok(())
//! }
//! ```

pub mod build;
pub mod histogram;
pub mod index;
pub mod info;
pub mod logging;
pub mod names;
pub mod overlap;
pub mod ovl;
pub mod plan;
pub mod readlen;
pub mod store;

mod error;

pub use error::{BuildError, Error, FormatError, PlanError, ReadError, Result, WriteError};
pub use info::StoreInfo;
pub use overlap::{decode_evalue, encode_evalue, Overlap, RecordLayout};
pub use plan::{PartitionPlan, PlanConfig};
pub use store::StoreReader;
