//! The dense read-ID-keyed index
//!
//! One 20-byte entry per read ID, `0..=max_id` in the final store (entry 0
//! is a placeholder so a read ID indexes the array directly). Entry fields
//! locate the read's contiguous run of overlaps: which slice, which piece
//! file within the slice, the record offset inside that piece, and the
//! run length. `overlap_id` is a monotonically increasing cursor over all
//! overlaps in the store, used to address the evalue overlay.
//!
//! Per-slice index files use the identical record format, covering only
//! the slice's assigned ID range; the merge step concatenates them.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ReadError, Result};

/// On-disk size of one index entry
pub const ENTRY_BYTES: usize = 20;

/// Location of one read's overlap run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Slice holding this read's overlaps
    pub slice: u16,
    /// Piece file within the slice
    pub piece: u16,
    /// Record offset of the run within the piece
    pub offset: u32,
    /// Number of overlaps for this read (0 = none)
    pub num_olaps: u32,
    /// Global overlap cursor of the run's first record
    pub overlap_id: u64,
}

impl IndexEntry {
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<LittleEndian>(self.slice)?;
        writer.write_u16::<LittleEndian>(self.piece)?;
        writer.write_u32::<LittleEndian>(self.offset)?;
        writer.write_u32::<LittleEndian>(self.num_olaps)?;
        writer.write_u64::<LittleEndian>(self.overlap_id)?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            slice: reader.read_u16::<LittleEndian>()?,
            piece: reader.read_u16::<LittleEndian>()?,
            offset: reader.read_u32::<LittleEndian>()?,
            num_olaps: reader.read_u32::<LittleEndian>()?,
            overlap_id: reader.read_u64::<LittleEndian>()?,
        })
    }
}

/// Writes a dense entry array to `path`
pub fn save_index<P: AsRef<Path>>(path: P, entries: &[IndexEntry]) -> Result<()> {
    let mut writer = File::create(path).map(BufWriter::new)?;
    for entry in entries {
        entry.write_bytes(&mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Loads a dense entry array, verifying the expected length when known.
///
/// A file whose size is not a whole number of entries, or whose entry
/// count disagrees with `expected_len`, is reported as a short file
/// naming the path.
pub fn load_index<P: AsRef<Path>>(path: P, expected_len: Option<u64>) -> Result<Vec<IndexEntry>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let bytes = file.metadata()?.len();

    if !bytes.is_multiple_of(ENTRY_BYTES as u64) {
        return Err(ReadError::TruncatedRecord {
            path: path.display().to_string(),
            expected: ENTRY_BYTES,
            found: (bytes % ENTRY_BYTES as u64) as usize,
        }
        .into());
    }

    let count = bytes / ENTRY_BYTES as u64;
    if let Some(expected) = expected_len {
        if count != expected {
            return Err(ReadError::ShortFile {
                path: path.display().to_string(),
                expected,
                found: count,
            }
            .into());
        }
    }

    let mut reader = BufReader::new(file);
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(IndexEntry::from_reader(&mut reader)?);
    }
    Ok(entries)
}

/// Builds a dense index over a contiguous read-ID range as sorted
/// overlaps stream past.
///
/// Reads with no overlaps still get an entry; those gap entries are
/// back-filled on finish with the position just past the preceding run,
/// so a scan positioned at an overlap-less read lands on the next data.
pub struct IndexAccumulator {
    bgn_id: u32,
    entries: Vec<IndexEntry>,
    cursor: u64,
}

impl IndexAccumulator {
    /// Accumulator covering reads `bgn_id..=end_id`
    #[must_use]
    pub fn new(bgn_id: u32, end_id: u32) -> Self {
        let len = (end_id - bgn_id + 1) as usize;
        Self {
            bgn_id,
            entries: vec![IndexEntry::default(); len],
            cursor: 0,
        }
    }

    /// Records one overlap for `id` located at `(slice, piece, offset)`.
    ///
    /// `offset` is the record offset of this overlap within the piece;
    /// only the first overlap of a read fixes the run's start position.
    ///
    /// # Panics
    ///
    /// Panics if `id` lies outside the accumulator's range; the caller
    /// routed an overlap to the wrong slice, which is a logic error.
    pub fn add_overlap(&mut self, id: u32, slice: u16, piece: u16, offset: u32) {
        let entry = &mut self.entries[(id - self.bgn_id) as usize];
        if entry.num_olaps == 0 {
            entry.slice = slice;
            entry.piece = piece;
            entry.offset = offset;
            entry.overlap_id = self.cursor;
        }
        entry.num_olaps += 1;
        self.cursor += 1;
    }

    /// Total overlaps accumulated so far
    #[must_use]
    pub fn num_overlaps(&self) -> u64 {
        self.cursor
    }

    /// Back-fills gap entries and returns the finished array
    #[must_use]
    pub fn finish(mut self) -> Vec<IndexEntry> {
        // Seed from the first real run so leading gaps point at it.
        let mut fill = self
            .entries
            .iter()
            .find(|e| e.num_olaps > 0)
            .map(|e| IndexEntry {
                num_olaps: 0,
                ..*e
            })
            .unwrap_or_default();

        for entry in &mut self.entries {
            if entry.num_olaps == 0 {
                entry.slice = fill.slice;
                entry.piece = fill.piece;
                entry.offset = fill.offset;
                entry.overlap_id = fill.overlap_id;
            } else {
                fill.slice = entry.slice;
                fill.piece = entry.piece;
                fill.offset = entry.offset + entry.num_olaps;
                fill.overlap_id = entry.overlap_id + u64::from(entry.num_olaps);
            }
        }
        self.entries
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entry_roundtrip() {
        let entry = IndexEntry {
            slice: 3,
            piece: 7,
            offset: 1234,
            num_olaps: 56,
            overlap_id: 987_654,
        };
        let mut buf = Vec::new();
        entry.write_bytes(&mut buf).unwrap();
        assert_eq!(buf.len(), ENTRY_BYTES);
        let back = IndexEntry::from_reader(&mut buf.as_slice()).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index");

        let entries: Vec<IndexEntry> = (0..100)
            .map(|i| IndexEntry {
                slice: 1,
                piece: 1,
                offset: i,
                num_olaps: 2,
                overlap_id: u64::from(i) * 2,
            })
            .collect();

        save_index(&path, &entries).unwrap();
        let back = load_index(&path, Some(100)).unwrap();
        assert_eq!(back, entries);

        assert!(load_index(&path, Some(99)).is_err());
    }

    #[test]
    fn test_accumulator_dense_with_gaps() {
        let mut acc = IndexAccumulator::new(10, 20);
        // read 12: three overlaps; read 15: one overlap
        acc.add_overlap(12, 1, 1, 0);
        acc.add_overlap(12, 1, 1, 1);
        acc.add_overlap(12, 1, 1, 2);
        acc.add_overlap(15, 1, 2, 0);
        assert_eq!(acc.num_overlaps(), 4);

        let entries = acc.finish();
        assert_eq!(entries.len(), 11);

        assert_eq!(entries[2].num_olaps, 3);
        assert_eq!(entries[2].overlap_id, 0);
        assert_eq!(entries[5].num_olaps, 1);
        assert_eq!(entries[5].overlap_id, 3);

        // Gap after read 12 points just past its run.
        assert_eq!(entries[3].num_olaps, 0);
        assert_eq!(entries[3].offset, 3);
        assert_eq!(entries[3].overlap_id, 3);

        // Leading gap points at the first run.
        assert_eq!(entries[0].num_olaps, 0);
        assert_eq!(entries[0].offset, 0);
    }

    #[test]
    fn test_accumulator_empty() {
        let acc = IndexAccumulator::new(1, 5);
        let entries = acc.finish();
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|e| e.num_olaps == 0));
    }
}
