//! Overlap file reader
//!
//! Streams records from either kind of overlap file, transparently
//! decompressing zstd blocks for compressed Full files. Normal files
//! additionally support O(1) record seeks, which the store reader uses
//! for random access.
//!
//! Any record cut short mid-read is a corruption error naming the file
//! and the expected versus found byte counts; there is no partial-read
//! mode.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use zstd::stream::decode_all;

use super::{BlockHeader, OvlFileHeader, RecordKind, SIZE_BLOCK_HEADER, SIZE_HEADER};
use crate::error::{ReadError, Result};
use crate::overlap::{Overlap, RecordLayout, MAX_PAYLOAD_WORDS};

/// Largest on-disk record size for any supported layout
const MAX_RECORD_BYTES: usize = 8 + 8 * MAX_PAYLOAD_WORDS;

/// Buffered reader for one overlap file.
pub struct OvlFileReader {
    path: PathBuf,
    reader: BufReader<File>,
    header: OvlFileHeader,
    block: Option<BlockReader>,
    rbuf: [u8; MAX_RECORD_BYTES],
}

impl OvlFileReader {
    /// Opens `path` and validates its header
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = File::open(&path).map(BufReader::new)?;
        let header = OvlFileHeader::from_reader(&mut reader)?;
        Ok(Self {
            path,
            reader,
            header,
            block: header.compressed.then(BlockReader::default),
            rbuf: [0; MAX_RECORD_BYTES],
        })
    }

    /// Opens `path`, additionally requiring the store's record layout
    pub fn open_expecting<P: AsRef<Path>>(path: P, layout: RecordLayout) -> Result<Self> {
        let reader = Self::open(path)?;
        if reader.header.layout != layout {
            return Err(crate::error::FormatError::ReadLenBitsMismatch {
                expected: layout.read_len_bits(),
                found: reader.header.layout.read_len_bits(),
            }
            .into());
        }
        Ok(reader)
    }

    /// The file's validated header
    #[must_use]
    pub fn header(&self) -> OvlFileHeader {
        self.header
    }

    /// Reads the next record into `ovl`.
    ///
    /// Returns `false` at a clean end of file. For Normal files the
    /// a-read ID is left untouched: it is implied by store position and
    /// filled in by the store reader.
    pub fn read_overlap(&mut self, ovl: &mut Overlap) -> Result<bool> {
        let layout = self.header.layout;
        let size = self.header.kind.record_bytes(layout);

        let have = if self.block.is_some() {
            self.next_block_record(size)?
        } else {
            self.fill_record(size)?
        };
        if !have {
            return Ok(false);
        }

        let buf = &self.rbuf[..size];
        let mut pos = 0;
        if self.header.kind == RecordKind::Full {
            ovl.a_id = LittleEndian::read_u32(&buf[pos..pos + 4]);
            pos += 4;
        }
        ovl.b_id = LittleEndian::read_u32(&buf[pos..pos + 4]);
        pos += 4;

        let mut words = [0u64; MAX_PAYLOAD_WORDS];
        let n = layout.payload_words();
        LittleEndian::read_u64_into(&buf[pos..pos + 8 * n], &mut words[..n]);
        layout.unpack(&words[..n], ovl);
        Ok(true)
    }

    /// Positions the cursor on record `index`.
    ///
    /// Only Normal files are seekable; Full and compressed files fail
    /// with [`ReadError::NotSeekable`].
    pub fn seek_overlap(&mut self, index: u64) -> Result<()> {
        if self.header.kind != RecordKind::Normal || self.header.compressed {
            return Err(ReadError::NotSeekable.into());
        }
        let size = self.header.kind.record_bytes(self.header.layout) as u64;
        self.reader
            .seek(SeekFrom::Start(SIZE_HEADER as u64 + index * size))?;
        Ok(())
    }

    /// Fills `rbuf[..size]` from the raw stream.
    ///
    /// Zero bytes at a record boundary is a clean end; anything between
    /// is corruption.
    fn fill_record(&mut self, size: usize) -> Result<bool> {
        let mut filled = 0;
        while filled < size {
            let n = self.reader.read(&mut self.rbuf[filled..size])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(ReadError::TruncatedRecord {
                    path: self.path.display().to_string(),
                    expected: size,
                    found: filled,
                }
                .into());
            }
            filled += n;
        }
        Ok(true)
    }

    /// Pulls the next record out of the current block, loading and
    /// decompressing the next block when the current one is exhausted
    fn next_block_record(&mut self, size: usize) -> Result<bool> {
        loop {
            let block = self.block.as_mut().expect("compressed reader lost its block");
            if block.records_left > 0 {
                if block.buf.len() - block.pos < size {
                    return Err(ReadError::TruncatedRecord {
                        path: self.path.display().to_string(),
                        expected: size,
                        found: block.buf.len() - block.pos,
                    }
                    .into());
                }
                self.rbuf[..size].copy_from_slice(&block.buf[block.pos..block.pos + size]);
                block.pos += size;
                block.records_left -= 1;
                return Ok(true);
            }

            // Current block exhausted; read the next block header.
            let mut hbuf = [0u8; SIZE_BLOCK_HEADER];
            let mut filled = 0;
            while filled < SIZE_BLOCK_HEADER {
                let n = self.reader.read(&mut hbuf[filled..])?;
                if n == 0 {
                    if filled == 0 {
                        return Ok(false);
                    }
                    return Err(ReadError::TruncatedRecord {
                        path: self.path.display().to_string(),
                        expected: SIZE_BLOCK_HEADER,
                        found: filled,
                    }
                    .into());
                }
                filled += n;
            }
            let header = BlockHeader::from_bytes(&hbuf)?;

            let mut zbuf = vec![0u8; header.size as usize];
            self.reader.read_exact(&mut zbuf)?;

            let block = self.block.as_mut().expect("compressed reader lost its block");
            block.buf = decode_all(zbuf.as_slice())?;
            block.pos = 0;
            block.records_left = header.records;
        }
    }
}

/// State of the currently loaded compressed block
#[derive(Default)]
struct BlockReader {
    buf: Vec<u8>,
    pos: usize,
    records_left: u32,
}
