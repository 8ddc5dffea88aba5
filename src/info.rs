//! Store metadata (the `info` file)
//!
//! A 56-byte record created once when construction starts and finalized
//! once when the store is sealed. Readers refuse to open a store whose
//! magic, version, or hang bit-width they do not understand.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FormatError, Result};
use crate::overlap::RecordLayout;

/// Magic number of a finished store: "OVLSTORE" in ASCII (little-endian)
const MAGIC: u64 = 0x45524f54534c564f;

/// Magic number of a store under construction: "OVLSTORP"
const MAGIC_INCOMPLETE: u64 = 0x50524f54534c564f;

/// Current store format version
const VERSION: u64 = 3;

/// Size of the info record in bytes
pub const SIZE_INFO: usize = 56;

/// Reserved trailing bytes, fixed filler
const RESERVED: [u8; 16] = [42; 16];

/// Metadata describing one overlap store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreInfo {
    magic: u64,
    version: u64,
    read_len_bits: u32,
    bgn_id: u32,
    end_id: u32,
    max_id: u32,
    num_overlaps: u64,
}

impl StoreInfo {
    /// Creates metadata for a store under construction
    #[must_use]
    pub fn new(layout: RecordLayout, max_id: u32) -> Self {
        Self {
            magic: MAGIC_INCOMPLETE,
            version: VERSION,
            read_len_bits: layout.read_len_bits(),
            bgn_id: u32::MAX,
            end_id: 0,
            max_id,
            num_overlaps: 0,
        }
    }

    /// True once the store has been sealed by the indexer or writer
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.magic == MAGIC
    }

    /// Marks the store finished; called exactly once at the end of a build
    pub fn mark_complete(&mut self) {
        self.magic = MAGIC;
    }

    /// The record layout this store was written with
    #[must_use]
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.read_len_bits)
    }

    /// First read ID with overlaps (`u32::MAX` while empty)
    #[must_use]
    pub fn bgn_id(&self) -> u32 {
        self.bgn_id
    }

    /// Last read ID with overlaps
    #[must_use]
    pub fn end_id(&self) -> u32 {
        self.end_id
    }

    /// Largest read ID the store covers
    #[must_use]
    pub fn max_id(&self) -> u32 {
        self.max_id
    }

    /// Total number of (mirrored) overlap records
    #[must_use]
    pub fn num_overlaps(&self) -> u64 {
        self.num_overlaps
    }

    /// Accounts `count` overlaps for read `id`, widening the ID range
    pub fn add_overlaps(&mut self, id: u32, count: u64) {
        if count > 0 {
            self.bgn_id = self.bgn_id.min(id);
            self.end_id = self.end_id.max(id);
        }
        self.num_overlaps += count;
    }

    /// Folds another info's ID range and overlap count into this one;
    /// used by the merge step to combine per-slice infos
    pub fn merge_counts(&mut self, other: &StoreInfo) {
        if other.num_overlaps > 0 {
            self.bgn_id = self.bgn_id.min(other.bgn_id);
            self.end_id = self.end_id.max(other.end_id);
        }
        self.num_overlaps += other.num_overlaps;
    }

    /// Serializes the info record to a writer
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(self.magic)?;
        writer.write_u64::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.read_len_bits)?;
        writer.write_u32::<LittleEndian>(self.bgn_id)?;
        writer.write_u32::<LittleEndian>(self.end_id)?;
        writer.write_u32::<LittleEndian>(self.max_id)?;
        writer.write_u64::<LittleEndian>(self.num_overlaps)?;
        writer.write_all(&RESERVED)?;
        Ok(())
    }

    /// Parses an info record, validating magic and version.
    ///
    /// Both the finished and the under-construction magic are accepted
    /// here; callers that require a sealed store check
    /// [`StoreInfo::is_complete`] themselves.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u64::<LittleEndian>()?;
        if magic != MAGIC && magic != MAGIC_INCOMPLETE {
            return Err(FormatError::InvalidMagicNumber(magic).into());
        }
        let version = reader.read_u64::<LittleEndian>()?;
        if version != VERSION {
            return Err(FormatError::InvalidFormatVersion(version).into());
        }
        let read_len_bits = reader.read_u32::<LittleEndian>()?;
        let bgn_id = reader.read_u32::<LittleEndian>()?;
        let end_id = reader.read_u32::<LittleEndian>()?;
        let max_id = reader.read_u32::<LittleEndian>()?;
        let num_overlaps = reader.read_u64::<LittleEndian>()?;
        let mut reserved = [0u8; 16];
        reader.read_exact(&mut reserved)?;
        Ok(Self {
            magic,
            version,
            read_len_bits,
            bgn_id,
            end_id,
            max_id,
            num_overlaps,
        })
    }

    /// Writes the record to a file, replacing any existing one
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = File::create(path).map(BufWriter::new)?;
        self.write_bytes(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads and validates the record at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = File::open(path).map(BufReader::new)?;
        Self::from_reader(&mut reader)
    }

    /// Checks that the store's layout matches what the caller was built for
    pub fn require_layout(&self, expected: RecordLayout) -> Result<()> {
        if self.read_len_bits != expected.read_len_bits() {
            return Err(FormatError::ReadLenBitsMismatch {
                expected: expected.read_len_bits(),
                found: self.read_len_bits,
            }
            .into());
        }
        Ok(())
    }
}
