//! Reading a finished store
//!
//! [`StoreReader`] validates the sealed info record, loads the dense
//! index, and serves three access patterns over the piece files:
//!
//! - a sequential cursor over a configured ID range
//!   ([`StoreReader::read_overlap`]), auto-advancing across piece
//!   boundaries and skipping reads with no overlaps;
//! - random access to one read's contiguous run
//!   ([`StoreReader::load_overlaps_for_read`]), reopening a piece file
//!   only when the target (slice, piece) differs from the one already
//!   open;
//! - batched sequential loads ([`StoreReader::load_block_of_overlaps`])
//!   sized to a caller capacity, never splitting one read's run across
//!   calls.
//!
//! If a companion `evalues` file exists it is memory-mapped and every
//! loaded overlap's evalue is transparently replaced through the index's
//! `overlap_id` cursor, so error-rate re-estimates apply without
//! rewriting a single overlap record.

use std::fs::File;
use std::path::{Path, PathBuf};

use bytemuck::cast_slice;
use memmap2::Mmap;

use crate::error::{FormatError, ReadError, Result};
use crate::index::{load_index, IndexEntry};
use crate::info::StoreInfo;
use crate::names;
use crate::overlap::{Overlap, RecordLayout};
use crate::ovl::OvlFileReader;

/// Read-only access to a finished overlap store.
pub struct StoreReader {
    store: PathBuf,
    info: StoreInfo,
    layout: RecordLayout,
    index: Vec<IndexEntry>,
    overlay: Option<EvalueOverlay>,

    // Requested ID range (inclusive).
    bgn_id: u32,
    end_id: u32,

    // Sequential cursor state.
    next_id: u32,
    cur_id: u32,
    remaining: u32,
    run_overlap_id: u64,
    stream: Option<OpenPiece>,

    // Random-access handle, separate so per-read lookups do not disturb
    // the sequential cursor.
    random: Option<OpenPiece>,
}

struct OpenPiece {
    slice: u16,
    piece: u16,
    reader: OvlFileReader,
}

impl StoreReader {
    /// Opens and validates a finished store.
    pub fn open<P: AsRef<Path>>(store: P) -> Result<Self> {
        let store = store.as_ref().to_path_buf();

        let info = StoreInfo::load(names::info(&store))?;
        if !info.is_complete() {
            return Err(FormatError::IncompleteStore(store.display().to_string()).into());
        }
        let layout = info.layout();

        let index = load_index(names::index(&store), Some(u64::from(info.max_id()) + 1))?;

        let overlay_path = names::evalues(&store);
        let overlay = if overlay_path.is_file() {
            Some(EvalueOverlay::open(&overlay_path, info.num_overlaps())?)
        } else {
            None
        };

        let max_id = info.max_id();
        Ok(Self {
            store,
            info,
            layout,
            index,
            overlay,
            bgn_id: 1,
            end_id: max_id,
            next_id: 1,
            cur_id: 0,
            remaining: 0,
            run_overlap_id: 0,
            stream: None,
            random: None,
        })
    }

    /// The store's metadata
    #[must_use]
    pub fn info(&self) -> &StoreInfo {
        &self.info
    }

    /// True if an evalue overlay is active
    #[must_use]
    pub fn has_evalue_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Restricts the sequential cursor to reads `bgn..=end` and rewinds
    pub fn set_range(&mut self, bgn: u32, end: u32) {
        self.bgn_id = bgn.max(1);
        self.end_id = end.min(self.info.max_id());
        self.next_id = self.bgn_id;
        self.cur_id = 0;
        self.remaining = 0;
    }

    /// Resets the cursor to the whole store
    pub fn reset_range(&mut self) {
        let max_id = self.info.max_id();
        self.set_range(1, max_id);
    }

    /// Total overlaps for reads in the configured range
    #[must_use]
    pub fn num_overlaps_in_range(&self) -> u64 {
        if self.bgn_id > self.end_id {
            return 0;
        }
        self.index[self.bgn_id as usize..=self.end_id as usize]
            .iter()
            .map(|e| u64::from(e.num_olaps))
            .sum()
    }

    /// Per-read overlap counts over the configured range
    #[must_use]
    pub fn num_overlaps_per_read(&self) -> Vec<u32> {
        if self.bgn_id > self.end_id {
            return Vec::new();
        }
        self.index[self.bgn_id as usize..=self.end_id as usize]
            .iter()
            .map(|e| e.num_olaps)
            .collect()
    }

    /// Overlap count for one read
    pub fn num_overlaps_for_read(&self, id: u32) -> Result<u32> {
        self.entry(id).map(|e| e.num_olaps)
    }

    /// Reads the next overlap of the sequential cursor.
    ///
    /// Returns `false` once the configured range is exhausted. Reads
    /// with no overlaps are skipped; piece-file boundaries are crossed
    /// automatically.
    pub fn read_overlap(&mut self, ovl: &mut Overlap) -> Result<bool> {
        if self.remaining == 0 && !self.position_next_run()? {
            return Ok(false);
        }

        let stream = self.stream.as_mut().expect("positioned cursor lost its piece");
        if !stream.reader.read_overlap(ovl)? {
            // The index promised more records than the piece holds.
            return Err(ReadError::ShortFile {
                path: names::piece(&self.store, u32::from(stream.slice), u32::from(stream.piece))
                    .display()
                    .to_string(),
                expected: u64::from(self.index[self.cur_id as usize].num_olaps),
                found: u64::from(self.index[self.cur_id as usize].num_olaps - self.remaining),
            }
            .into());
        }

        ovl.a_id = self.cur_id;
        if let Some(overlay) = &self.overlay {
            ovl.evalue = overlay.get(self.run_overlap_id);
        }
        self.run_overlap_id += 1;
        self.remaining -= 1;
        Ok(true)
    }

    /// Loads the full contiguous run for one read.
    ///
    /// `out` is cleared first. A read with no overlaps returns 0 without
    /// touching any file handle, leaving the sequential cursor (and the
    /// random-access handle) exactly where they were.
    pub fn load_overlaps_for_read(&mut self, id: u32, out: &mut Vec<Overlap>) -> Result<u32> {
        out.clear();

        let entry = self.entry(id)?;
        if entry.num_olaps == 0 {
            return Ok(0);
        }

        // Reopen only if the target piece differs from the open handle.
        let reuse = self
            .random
            .as_ref()
            .is_some_and(|open| open.slice == entry.slice && open.piece == entry.piece);
        if !reuse {
            let path = names::piece(&self.store, u32::from(entry.slice), u32::from(entry.piece));
            self.random = Some(OpenPiece {
                slice: entry.slice,
                piece: entry.piece,
                reader: OvlFileReader::open_expecting(&path, self.layout)?,
            });
        }

        let open = self.random.as_mut().expect("random handle just ensured");
        open.reader.seek_overlap(u64::from(entry.offset))?;

        let mut ovl = Overlap::default();
        for k in 0..entry.num_olaps {
            if !open.reader.read_overlap(&mut ovl)? {
                return Err(ReadError::ShortFile {
                    path: names::piece(&self.store, u32::from(entry.slice), u32::from(entry.piece))
                        .display()
                        .to_string(),
                    expected: u64::from(entry.num_olaps),
                    found: u64::from(k),
                }
                .into());
            }
            ovl.a_id = id;
            if let Some(overlay) = &self.overlay {
                ovl.evalue = overlay.get(entry.overlap_id + u64::from(k));
            }
            out.push(ovl);
        }
        Ok(entry.num_olaps)
    }

    /// Loads whole runs sequentially until `capacity` records are
    /// buffered.
    ///
    /// Never splits a run across calls: a run that does not fit is left
    /// for the next call, except a single run larger than `capacity`,
    /// which is delivered alone. Returns 0 once the range is exhausted.
    pub fn load_block_of_overlaps(
        &mut self,
        out: &mut Vec<Overlap>,
        capacity: usize,
    ) -> Result<usize> {
        out.clear();

        loop {
            if self.remaining == 0 && !self.position_next_run()? {
                break;
            }
            // Would the rest of this run overflow the caller's buffer?
            if !out.is_empty() && out.len() + self.remaining as usize > capacity {
                break;
            }

            let mut ovl = Overlap::default();
            while self.remaining > 0 {
                if !self.read_overlap(&mut ovl)? {
                    break;
                }
                out.push(ovl);
            }

            if out.len() >= capacity {
                break;
            }
        }
        Ok(out.len())
    }

    /// Advances the cursor to the next read in range with overlaps and
    /// positions the stream at its first record
    fn position_next_run(&mut self) -> Result<bool> {
        while self.next_id <= self.end_id {
            let entry = self.index[self.next_id as usize];
            if entry.num_olaps == 0 {
                self.next_id += 1;
                continue;
            }

            let reuse = self
                .stream
                .as_ref()
                .is_some_and(|open| open.slice == entry.slice && open.piece == entry.piece);
            if !reuse {
                let path =
                    names::piece(&self.store, u32::from(entry.slice), u32::from(entry.piece));
                self.stream = Some(OpenPiece {
                    slice: entry.slice,
                    piece: entry.piece,
                    reader: OvlFileReader::open_expecting(&path, self.layout)?,
                });
            }

            let stream = self.stream.as_mut().expect("stream handle just ensured");
            stream.reader.seek_overlap(u64::from(entry.offset))?;

            self.cur_id = self.next_id;
            self.remaining = entry.num_olaps;
            self.run_overlap_id = entry.overlap_id;
            self.next_id += 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn entry(&self, id: u32) -> Result<IndexEntry> {
        if id == 0 || id > self.info.max_id() {
            return Err(ReadError::OutOfRange(id, self.info.max_id()).into());
        }
        Ok(self.index[id as usize])
    }
}

/// Memory-mapped `evalues` side file: one u16 per overlap ID.
struct EvalueOverlay {
    mmap: Mmap,
}

impl EvalueOverlay {
    fn open(path: &Path, num_overlaps: u64) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let found = (mmap.len() / 2) as u64;
        if found < num_overlaps {
            return Err(ReadError::OverlayTooSmall {
                expected: num_overlaps,
                found,
            }
            .into());
        }
        Ok(Self { mmap })
    }

    fn get(&self, overlap_id: u64) -> u16 {
        let values: &[u16] = cast_slice(&self.mmap[..self.mmap.len() & !1]);
        values[overlap_id as usize]
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::build::StoreWriter;
    use crate::overlap::encode_evalue;
    use crate::readlen::MemoryReadLengths;
    use tempfile::TempDir;

    const MAX_ID: u32 = 40;

    fn usable(a: u32, b: u32, erate: f64) -> Overlap {
        Overlap {
            a_id: a,
            b_id: b,
            span: 250,
            evalue: encode_evalue(erate),
            for_utg: true,
            ..Overlap::default()
        }
    }

    /// Builds a small sequential store: reads 3 and 7 have runs, read 5
    /// has none
    fn build_store(dir: &Path) -> PathBuf {
        let store = dir.join("store");
        let lengths = MemoryReadLengths::uniform(MAX_ID, 900);
        let mut writer =
            StoreWriter::create(&store, RecordLayout::new(16), MAX_ID, lengths).unwrap();
        writer.write_overlap(&usable(3, 10, 0.01)).unwrap();
        writer.write_overlap(&usable(3, 11, 0.02)).unwrap();
        writer.write_overlap(&usable(3, 12, 0.03)).unwrap();
        writer.write_overlap(&usable(7, 3, 0.04)).unwrap();
        writer.write_overlap(&usable(7, 9, 0.05)).unwrap();
        writer.finish().unwrap();
        store
    }

    #[test]
    fn test_sequential_cursor_skips_empty_reads() {
        let dir = TempDir::new().unwrap();
        let store = build_store(dir.path());

        let mut reader = StoreReader::open(&store).unwrap();
        let mut ovl = Overlap::default();
        let mut seen = Vec::new();
        while reader.read_overlap(&mut ovl).unwrap() {
            seen.push((ovl.a_id, ovl.b_id));
        }
        assert_eq!(seen, vec![(3, 10), (3, 11), (3, 12), (7, 3), (7, 9)]);
    }

    #[test]
    fn test_set_range() {
        let dir = TempDir::new().unwrap();
        let store = build_store(dir.path());

        let mut reader = StoreReader::open(&store).unwrap();
        reader.set_range(4, 40);
        assert_eq!(reader.num_overlaps_in_range(), 2);

        let mut ovl = Overlap::default();
        assert!(reader.read_overlap(&mut ovl).unwrap());
        assert_eq!(ovl.a_id, 7);
    }

    #[test]
    fn test_load_overlaps_for_read() {
        let dir = TempDir::new().unwrap();
        let store = build_store(dir.path());

        let mut reader = StoreReader::open(&store).unwrap();
        let mut run = Vec::new();

        assert_eq!(reader.load_overlaps_for_read(3, &mut run).unwrap(), 3);
        assert_eq!(run.len(), 3);
        assert!(run.iter().all(|o| o.a_id == 3));

        // Zero-overlap read: count 0, nothing disturbed.
        assert_eq!(reader.load_overlaps_for_read(5, &mut run).unwrap(), 0);
        assert!(run.is_empty());

        assert_eq!(reader.load_overlaps_for_read(7, &mut run).unwrap(), 2);
        assert_eq!(run[0].b_id, 3);

        assert!(reader.load_overlaps_for_read(0, &mut run).is_err());
        assert!(reader.load_overlaps_for_read(MAX_ID + 1, &mut run).is_err());
    }

    #[test]
    fn test_zero_read_leaves_cursor_alone() {
        let dir = TempDir::new().unwrap();
        let store = build_store(dir.path());

        let mut reader = StoreReader::open(&store).unwrap();
        let mut ovl = Overlap::default();

        // Consume one record, query an empty read, keep streaming.
        assert!(reader.read_overlap(&mut ovl).unwrap());
        assert_eq!((ovl.a_id, ovl.b_id), (3, 10));

        let mut run = Vec::new();
        assert_eq!(reader.load_overlaps_for_read(5, &mut run).unwrap(), 0);

        assert!(reader.read_overlap(&mut ovl).unwrap());
        assert_eq!((ovl.a_id, ovl.b_id), (3, 11));
    }

    #[test]
    fn test_load_block_never_splits_a_run() {
        let dir = TempDir::new().unwrap();
        let store = build_store(dir.path());

        let mut reader = StoreReader::open(&store).unwrap();
        let mut block = Vec::new();

        // Capacity 4 fits read 3's run (3 records) but not read 7's too.
        assert_eq!(reader.load_block_of_overlaps(&mut block, 4).unwrap(), 3);
        assert!(block.iter().all(|o| o.a_id == 3));

        assert_eq!(reader.load_block_of_overlaps(&mut block, 4).unwrap(), 2);
        assert!(block.iter().all(|o| o.a_id == 7));

        assert_eq!(reader.load_block_of_overlaps(&mut block, 4).unwrap(), 0);
    }

    #[test]
    fn test_evalue_overlay() {
        let dir = TempDir::new().unwrap();
        let store = build_store(dir.path());

        // Override overlap_id 1 (read 3's second record); keep the rest.
        let original: Vec<u16> = [0.01, 0.02, 0.03, 0.04, 0.05]
            .iter()
            .map(|&e| encode_evalue(e))
            .collect();
        let mut overlay = original.clone();
        overlay[1] = encode_evalue(0.25);
        let bytes: Vec<u8> = overlay.iter().flat_map(|v| v.to_le_bytes()).collect();
        std::fs::write(names::evalues(&store), bytes).unwrap();

        let mut reader = StoreReader::open(&store).unwrap();
        assert!(reader.has_evalue_overlay());

        let mut ovl = Overlap::default();
        let mut got = Vec::new();
        while reader.read_overlap(&mut ovl).unwrap() {
            got.push(ovl.evalue);
        }
        assert_eq!(got[1], encode_evalue(0.25));
        assert_eq!(got[0], original[0]);
        assert_eq!(got[2], original[2]);
        assert_eq!(got[3], original[3]);

        // Random access sees the same overrides.
        let mut run = Vec::new();
        reader.load_overlaps_for_read(3, &mut run).unwrap();
        assert_eq!(run[1].evalue, encode_evalue(0.25));
        assert_eq!(run[0].evalue, original[0]);
    }

    #[test]
    fn test_incomplete_store_rejected() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("partial");
        std::fs::create_dir(&store).unwrap();
        StoreInfo::new(RecordLayout::new(16), 10)
            .save(names::info(&store))
            .unwrap();

        assert!(StoreReader::open(&store).is_err());
    }
}
