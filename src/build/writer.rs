//! Sequential store construction
//!
//! [`StoreWriter`] is the single-process alternative to the distributed
//! pipeline: it accepts already-globally-sorted overlaps one at a time
//! and builds the same on-disk store (piece files, dense index,
//! statistics, sealed info) without buckets or slices. Everything
//! lands in slice 0.
//!
//! Out-of-order input is fatal: a record whose a-read precedes the last
//! one written would corrupt the contiguous-run invariant every reader
//! depends on.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{Result, WriteError};
use crate::histogram::OverlapHistogram;
use crate::index::{save_index, IndexAccumulator, IndexEntry};
use crate::info::StoreInfo;
use crate::names;
use crate::overlap::{Overlap, RecordLayout};
use crate::ovl::{OvlFileWriter, OvlFileWriterBuilder, RecordKind};
use crate::readlen::ReadLengths;

/// Default records per piece file, matching the sorter
const DEFAULT_PIECE_RECORDS: u64 = (1 << 30) / 28;

/// Builds a store sequentially from sorted overlaps.
pub struct StoreWriter<L: ReadLengths> {
    store: PathBuf,
    layout: RecordLayout,
    info: StoreInfo,
    acc: IndexAccumulator,
    hist: OverlapHistogram,
    lengths: L,

    piece: u32,
    piece_written: u64,
    piece_records: u64,
    writer: Option<OvlFileWriter<BufWriter<File>>>,
    last_a: u32,
    finished: bool,
}

impl<L: ReadLengths> StoreWriter<L> {
    /// Creates the store directory and an incomplete info record.
    ///
    /// Refuses to overwrite a directory already holding a finished
    /// store.
    pub fn create<P: AsRef<Path>>(
        store: P,
        layout: RecordLayout,
        max_id: u32,
        lengths: L,
    ) -> Result<Self> {
        let store = store.as_ref().to_path_buf();

        let info_path = names::info(&store);
        if info_path.is_file() {
            if let Ok(existing) = StoreInfo::load(&info_path) {
                if existing.is_complete() {
                    return Err(WriteError::StoreExists(store.display().to_string()).into());
                }
            }
        }

        fs::create_dir_all(&store)?;
        let info = StoreInfo::new(layout, max_id);
        info.save(&info_path)?;

        let max_read_len = lengths.max_read_length();
        Ok(Self {
            store,
            layout,
            info,
            acc: IndexAccumulator::new(1, max_id),
            hist: OverlapHistogram::new(max_id, max_read_len),
            lengths,
            piece: 0,
            piece_written: 0,
            piece_records: DEFAULT_PIECE_RECORDS,
            writer: None,
            last_a: 0,
            finished: false,
        })
    }

    /// Overrides the records-per-piece threshold
    #[must_use]
    pub fn with_piece_records(mut self, piece_records: u64) -> Self {
        self.piece_records = piece_records.max(1);
        self
    }

    /// Appends one overlap; input must be sorted by a-read.
    pub fn write_overlap(&mut self, ovl: &Overlap) -> Result<()> {
        if ovl.a_id < self.last_a {
            return Err(WriteError::SortOrderViolation {
                last: self.last_a,
                this: ovl.a_id,
                b: ovl.b_id,
            }
            .into());
        }
        if ovl.a_id == 0 || ovl.a_id > self.info.max_id() || ovl.b_id > self.info.max_id() {
            return Err(WriteError::IdOutOfRange {
                a: ovl.a_id,
                b: ovl.b_id,
                max: self.info.max_id(),
            }
            .into());
        }

        // Roll pieces at the threshold, deferred to a read boundary so a
        // read's run stays whole.
        if self.writer.is_some() && self.piece_written >= self.piece_records && ovl.a_id != self.last_a
        {
            if let Some(mut writer) = self.writer.take() {
                writer.finish()?;
            }
            self.piece_written = 0;
        }

        if self.writer.is_none() {
            self.piece += 1;
            self.writer = Some(
                OvlFileWriterBuilder::default()
                    .kind(RecordKind::Normal)
                    .layout(self.layout)
                    .create(names::piece(&self.store, 0, self.piece))?,
            );
        }

        let writer = self.writer.as_mut().expect("piece writer just ensured");
        writer.write_overlap(ovl)?;
        self.acc
            .add_overlap(ovl.a_id, 0, self.piece as u16, self.piece_written as u32);
        self.hist.add_overlap(ovl, &self.lengths);
        self.info.add_overlaps(ovl.a_id, 1);

        self.piece_written += 1;
        self.last_a = ovl.a_id;
        Ok(())
    }

    /// Seals the store: final piece, index, statistics, completed info.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }

        if let Some(mut writer) = self.writer.take() {
            writer.finish()?;
        }
        self.hist.finish();

        // Dense index over 0..=max_id; entry 0 is a placeholder.
        let mut entries: Vec<IndexEntry> = Vec::with_capacity(self.info.max_id() as usize + 1);
        entries.push(IndexEntry::default());
        entries.extend(std::mem::replace(&mut self.acc, IndexAccumulator::new(1, 1)).finish());
        save_index(names::index(&self.store), &entries)?;

        self.hist.save(names::statistics(&self.store))?;

        self.info.mark_complete();
        self.info.save(names::info(&self.store))?;

        info!(
            "created store '{}' with {} overlaps for reads {}..={}",
            self.store.display(),
            self.info.num_overlaps(),
            self.info.bgn_id(),
            self.info.end_id()
        );
        self.finished = true;
        Ok(())
    }
}

impl<L: ReadLengths> Drop for StoreWriter<L> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish().expect("StoreWriter: failed to finish");
        }
    }
}
