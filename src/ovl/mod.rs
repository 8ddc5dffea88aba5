//! # ovl
//!
//! Overlap file codec: buffered readers and writers for the two on-disk
//! record kinds, plus the per-file overlap-count sidecar.
//!
//! ## Record kinds
//!
//! - **Full**: two leading `u32` read IDs followed by the bit-packed
//!   payload words. Used for producer output and the bucketizer's slice
//!   partitions. Sequential only; optionally zstd-block-compressed.
//! - **Normal**: one leading `u32` ID (the b-read; the a-read is implied
//!   by store position) followed by the payload words. Used for the
//!   finished store's piece files. Never compressed, so any record can be
//!   seeked to in O(1).
//!
//! ## File format
//!
//! Every overlap file starts with a fixed 32-byte header:
//!
//! | Offset | Size | Name          | Description                        |
//! | ------ | ---- | ------------- | ---------------------------------- |
//! | 0      | 8    | magic         | "OVLF:SEQ"                         |
//! | 8      | 1    | format        | Format version (currently 1)       |
//! | 9      | 1    | kind          | 0 = Normal, 1 = Full               |
//! | 10     | 1    | compressed    | 1 if blocks are zstd compressed    |
//! | 11     | 1    | read_len_bits | Hang bit-width of the payload      |
//! | 12     | 20   | reserved      | Reserved for future use            |
//!
//! Uncompressed files hold raw records back to back. Compressed files
//! hold a sequence of blocks, each a 32-byte block header (magic,
//! compressed byte length, record count) followed by the zstd payload.

mod counts;
mod reader;
mod writer;

pub use counts::OverlapCounts;
pub use reader::OvlFileReader;
pub use writer::{OvlFileWriter, OvlFileWriterBuilder};

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};
use crate::overlap::RecordLayout;

/// File magic: "OVLF:SEQ" in ASCII (little-endian)
const MAGIC: u64 = 0x5145533a464c564f;

/// Block magic: "OVLBLOCK" in ASCII (little-endian)
const BLOCK_MAGIC: u64 = 0x4b434f4c424c564f;

/// Current overlap file format version
const FORMAT: u8 = 1;

/// Size of the file header in bytes
pub const SIZE_HEADER: usize = 32;

/// Size of a block header in bytes
pub const SIZE_BLOCK_HEADER: usize = 32;

/// Uncompressed size at which a compressed block is flushed: 256 KiB
pub const BLOCK_SIZE: usize = 256 * 1024;

/// Which record shape a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// One leading ID, seekable, never compressed
    Normal,
    /// Two leading IDs, sequential, optionally compressed
    Full,
}

impl RecordKind {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Full),
            other => Err(FormatError::InvalidRecordKind(other).into()),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Full => 1,
        }
    }

    /// On-disk record size for this kind under `layout`
    #[must_use]
    pub fn record_bytes(self, layout: RecordLayout) -> usize {
        match self {
            Self::Normal => layout.normal_record_bytes(),
            Self::Full => layout.full_record_bytes(),
        }
    }
}

/// Parsed overlap file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OvlFileHeader {
    pub kind: RecordKind,
    pub compressed: bool,
    pub layout: RecordLayout,
}

impl OvlFileHeader {
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buffer = [0u8; SIZE_HEADER];
        LittleEndian::write_u64(&mut buffer[0..8], MAGIC);
        buffer[8] = FORMAT;
        buffer[9] = self.kind.to_byte();
        buffer[10] = u8::from(self.compressed);
        buffer[11] = self.layout.read_len_bits() as u8;
        buffer[12..].fill(42);
        writer.write_all(&buffer)?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buffer = [0u8; SIZE_HEADER];
        reader.read_exact(&mut buffer)?;

        let magic = LittleEndian::read_u64(&buffer[0..8]);
        if magic != MAGIC {
            return Err(FormatError::InvalidMagicNumber(magic).into());
        }
        if buffer[8] != FORMAT {
            return Err(FormatError::InvalidFormatVersion(u64::from(buffer[8])).into());
        }
        let kind = RecordKind::from_byte(buffer[9])?;
        let compressed = buffer[10] != 0;
        let layout = RecordLayout::new(u32::from(buffer[11]));
        Ok(Self {
            kind,
            compressed,
            layout,
        })
    }
}

/// Per-block header for compressed Full files
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockHeader {
    /// Compressed payload length in bytes
    pub size: u64,
    /// Number of records in the block
    pub records: u32,
}

impl BlockHeader {
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buffer = [0u8; SIZE_BLOCK_HEADER];
        LittleEndian::write_u64(&mut buffer[0..8], BLOCK_MAGIC);
        LittleEndian::write_u64(&mut buffer[8..16], self.size);
        LittleEndian::write_u32(&mut buffer[16..20], self.records);
        buffer[20..].fill(42);
        writer.write_all(&buffer)?;
        Ok(())
    }

    pub fn from_bytes(buffer: &[u8; SIZE_BLOCK_HEADER]) -> Result<Self> {
        let magic = LittleEndian::read_u64(&buffer[0..8]);
        if magic != BLOCK_MAGIC {
            return Err(FormatError::InvalidMagicNumber(magic).into());
        }
        Ok(Self {
            size: LittleEndian::read_u64(&buffer[8..16]),
            records: LittleEndian::read_u32(&buffer[16..20]),
        })
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_roundtrip() {
        let header = OvlFileHeader {
            kind: RecordKind::Full,
            compressed: true,
            layout: RecordLayout::new(16),
        };
        let mut buf = Vec::new();
        header.write_bytes(&mut buf).unwrap();
        assert_eq!(buf.len(), SIZE_HEADER);
        let back = OvlFileHeader::from_reader(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_header_rejects_garbage() {
        let buf = [0u8; SIZE_HEADER];
        assert!(OvlFileHeader::from_reader(&mut Cursor::new(buf)).is_err());
    }
}
