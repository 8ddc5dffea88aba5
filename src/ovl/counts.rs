//! Per-file overlap-count sidecar
//!
//! Producer files carry a `.counts` sidecar recording, for every read ID,
//! how many store records that file will contribute once its overlaps are
//! mirrored (one for the a-read and one for the b-read of each raw
//! record). The planner works entirely from these sidecars: it never has
//! to stream the overlap data itself to size slices and buckets.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FormatError, Result};
use crate::overlap::Overlap;

/// Sidecar magic: "OVLCOUNT" in ASCII (little-endian)
const MAGIC: u64 = 0x544e554f434c564f;

/// Current sidecar format version
const VERSION: u8 = 1;

/// Overlap counts per read ID for one producer file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapCounts {
    counts: Vec<u32>,
    total: u64,
}

impl OverlapCounts {
    /// Empty counts covering reads `0..=max_id`
    #[must_use]
    pub fn new(max_id: u32) -> Self {
        Self {
            counts: vec![0; max_id as usize + 1],
            total: 0,
        }
    }

    /// Largest read ID covered
    #[must_use]
    pub fn max_id(&self) -> u32 {
        (self.counts.len() - 1) as u32
    }

    /// Total store records accounted (mirrored; 2x the raw record count)
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Store records destined for read `id`
    #[must_use]
    pub fn count(&self, id: u32) -> u32 {
        self.counts.get(id as usize).copied().unwrap_or(0)
    }

    /// Largest per-read count; the planner's hard floor on slice size
    #[must_use]
    pub fn max_per_read(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Accounts one raw overlap: one store record for each direction
    pub fn add(&mut self, ovl: &Overlap) {
        self.counts[ovl.a_id as usize] += 1;
        self.counts[ovl.b_id as usize] += 1;
        self.total += 2;
    }

    /// Accounts a single direction (used when a filter drops its mirror)
    pub fn add_one(&mut self, id: u32) {
        self.counts[id as usize] += 1;
        self.total += 1;
    }

    /// Adds another file's counts into this accumulator
    pub fn accumulate(&mut self, other: &OverlapCounts) {
        debug_assert_eq!(self.counts.len(), other.counts.len());
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        self.total += other.total;
    }

    /// Writes the sidecar. Only nonzero entries are stored.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = File::create(path).map(BufWriter::new)?;

        writer.write_u64::<LittleEndian>(MAGIC)?;
        writer.write_u8(VERSION)?;
        writer.write_u32::<LittleEndian>(self.max_id())?;
        writer.write_u64::<LittleEndian>(self.total)?;

        let nonzero = self.counts.iter().filter(|&&c| c > 0).count() as u64;
        writer.write_u64::<LittleEndian>(nonzero)?;
        for (id, &count) in self.counts.iter().enumerate() {
            if count > 0 {
                writer.write_u32::<LittleEndian>(id as u32)?;
                writer.write_u32::<LittleEndian>(count)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Loads a sidecar written by [`OverlapCounts::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = File::open(path).map(BufReader::new)?;

        let magic = reader.read_u64::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(FormatError::InvalidMagicNumber(magic).into());
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(FormatError::InvalidFormatVersion(u64::from(version)).into());
        }

        let max_id = reader.read_u32::<LittleEndian>()?;
        let total = reader.read_u64::<LittleEndian>()?;
        let nonzero = reader.read_u64::<LittleEndian>()?;

        let mut counts = Self::new(max_id);
        for _ in 0..nonzero {
            let id = reader.read_u32::<LittleEndian>()?;
            let count = reader.read_u32::<LittleEndian>()?;
            counts.counts[id as usize] = count;
        }
        counts.total = total;
        Ok(counts)
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counts_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.ovl.counts");

        let mut counts = OverlapCounts::new(100);
        counts.add(&Overlap {
            a_id: 3,
            b_id: 70,
            ..Overlap::default()
        });
        counts.add(&Overlap {
            a_id: 3,
            b_id: 9,
            ..Overlap::default()
        });

        counts.save(&path).unwrap();
        let back = OverlapCounts::load(&path).unwrap();
        assert_eq!(back, counts);
        assert_eq!(back.total(), 4);
        assert_eq!(back.count(3), 2);
        assert_eq!(back.count(70), 1);
        assert_eq!(back.count(4), 0);
        assert_eq!(back.max_per_read(), 2);
    }

    #[test]
    fn test_accumulate() {
        let mut a = OverlapCounts::new(10);
        let mut b = OverlapCounts::new(10);
        a.add_one(5);
        b.add_one(5);
        b.add_one(7);
        a.accumulate(&b);
        assert_eq!(a.count(5), 2);
        assert_eq!(a.count(7), 1);
        assert_eq!(a.total(), 3);
    }
}
