//! Overlap file writer
//!
//! Writes either record kind behind one interface. Full-kind writers may
//! compress: records accumulate in an uncompressed buffer which is
//! flushed as a zstd block (with a 32-byte block header carrying the
//! compressed length and record count) whenever it would exceed
//! [`BLOCK_SIZE`](super::BLOCK_SIZE). Normal-kind writers emit raw
//! records so the reader can seek.
//!
//! A writer created through [`OvlFileWriterBuilder::create`] with
//! `counts` enabled also maintains the per-read counts sidecar and
//! writes it next to the data file on [`OvlFileWriter::finish`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use zstd::Encoder as ZstdEncoder;

use super::{BlockHeader, OverlapCounts, OvlFileHeader, RecordKind, BLOCK_SIZE};
use crate::error::Result;
use crate::names;
use crate::overlap::{Overlap, RecordLayout, MAX_PAYLOAD_WORDS};

/// zstd compression level for record blocks
const COMPRESSION_LEVEL: i32 = 3;

/// Builder for configured [`OvlFileWriter`] instances.
#[derive(Default)]
pub struct OvlFileWriterBuilder {
    kind: Option<RecordKind>,
    layout: Option<RecordLayout>,
    compressed: bool,
    counts_max_id: Option<u32>,
}

impl OvlFileWriterBuilder {
    #[must_use]
    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn layout(mut self, layout: RecordLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Enables zstd block compression (Full kind only)
    #[must_use]
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Maintains a per-read counts sidecar covering reads `0..=max_id`.
    ///
    /// Only honored by [`OvlFileWriterBuilder::create`]; a writer over a
    /// plain `Write` sink has nowhere to put the sidecar.
    #[must_use]
    pub fn counts(mut self, max_id: u32) -> Self {
        self.counts_max_id = Some(max_id);
        self
    }

    fn header(&self) -> OvlFileHeader {
        let kind = self.kind.unwrap_or(RecordKind::Full);
        OvlFileHeader {
            kind,
            // Normal files must stay seekable
            compressed: self.compressed && kind == RecordKind::Full,
            layout: self.layout.unwrap_or_default(),
        }
    }

    /// Builds a writer over an arbitrary sink (no counts sidecar)
    pub fn build<W: Write>(self, inner: W) -> Result<OvlFileWriter<W>> {
        OvlFileWriter::new(inner, self.header(), None)
    }

    /// Creates `path` and builds a writer over it, with the counts
    /// sidecar at `<path>.counts` when counting is enabled
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<OvlFileWriter<BufWriter<File>>> {
        let path = path.as_ref();
        let sidecar = self
            .counts_max_id
            .map(|max_id| (names::counts_sidecar(path), OverlapCounts::new(max_id)));
        let inner = File::create(path).map(BufWriter::new)?;
        OvlFileWriter::new(inner, self.header(), sidecar)
    }
}

/// Buffered writer for one overlap file.
pub struct OvlFileWriter<W: Write> {
    inner: W,
    header: OvlFileHeader,
    block: Option<BlockWriter>,
    counts: Option<(PathBuf, OverlapCounts)>,
    words: [u64; MAX_PAYLOAD_WORDS],
    num_written: u64,
    finished: bool,
}

impl<W: Write> OvlFileWriter<W> {
    fn new(
        mut inner: W,
        header: OvlFileHeader,
        counts: Option<(PathBuf, OverlapCounts)>,
    ) -> Result<Self> {
        header.write_bytes(&mut inner)?;
        Ok(Self {
            inner,
            header,
            block: header.compressed.then(BlockWriter::new),
            counts,
            words: [0; MAX_PAYLOAD_WORDS],
            num_written: 0,
            finished: false,
        })
    }

    /// The header this writer stamped on the file
    #[must_use]
    pub fn header(&self) -> OvlFileHeader {
        self.header
    }

    /// Records written so far
    #[must_use]
    pub fn num_written(&self) -> u64 {
        self.num_written
    }

    /// Appends one overlap.
    ///
    /// Normal-kind files store only the b-read ID; the a-read is implied
    /// by the record's position and the store index.
    pub fn write_overlap(&mut self, ovl: &Overlap) -> Result<()> {
        let layout = self.header.layout;
        let n = layout.payload_words();
        layout.pack(ovl, &mut self.words[..n])?;

        if let Some(block) = &mut self.block {
            if block.would_overflow(self.header.kind.record_bytes(layout)) {
                block.flush(&mut self.inner)?;
            }
            block.push(ovl, self.header.kind, &self.words[..n]);
        } else {
            match self.header.kind {
                RecordKind::Full => {
                    self.inner.write_u32::<LittleEndian>(ovl.a_id)?;
                    self.inner.write_u32::<LittleEndian>(ovl.b_id)?;
                }
                RecordKind::Normal => {
                    self.inner.write_u32::<LittleEndian>(ovl.b_id)?;
                }
            }
            for &word in &self.words[..n] {
                self.inner.write_u64::<LittleEndian>(word)?;
            }
        }

        if let Some((_, counts)) = &mut self.counts {
            counts.add(ovl);
        }
        self.num_written += 1;
        Ok(())
    }

    /// Flushes pending blocks and buffers and writes the counts sidecar.
    ///
    /// Must be called before the writer is dropped; `Drop` re-invokes it
    /// as a backstop and panics on failure.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if let Some(block) = &mut self.block {
            block.flush(&mut self.inner)?;
        }
        self.inner.flush()?;
        if let Some((path, counts)) = &self.counts {
            counts.save(path)?;
        }
        self.finished = true;
        Ok(())
    }

}

impl<W: Write> Drop for OvlFileWriter<W> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish().expect("OvlFileWriter: failed to finish");
        }
    }
}

/// Accumulates records for one compressed block
struct BlockWriter {
    ubuf: Vec<u8>,
    zbuf: Vec<u8>,
    records: u32,
}

impl BlockWriter {
    fn new() -> Self {
        Self {
            ubuf: Vec::with_capacity(BLOCK_SIZE),
            zbuf: Vec::with_capacity(BLOCK_SIZE),
            records: 0,
        }
    }

    fn would_overflow(&self, record_size: usize) -> bool {
        self.ubuf.len() + record_size > BLOCK_SIZE
    }

    fn push(&mut self, ovl: &Overlap, kind: RecordKind, words: &[u64]) {
        if kind == RecordKind::Full {
            self.ubuf.extend_from_slice(&ovl.a_id.to_le_bytes());
        }
        self.ubuf.extend_from_slice(&ovl.b_id.to_le_bytes());
        for &word in words {
            self.ubuf.extend_from_slice(&word.to_le_bytes());
        }
        self.records += 1;
    }

    fn flush<W: Write>(&mut self, inner: &mut W) -> Result<()> {
        if self.records == 0 {
            return Ok(());
        }

        self.zbuf.clear();
        let mut encoder = ZstdEncoder::new(&mut self.zbuf, COMPRESSION_LEVEL)?;
        encoder.write_all(&self.ubuf)?;
        encoder.finish()?;

        let header = BlockHeader {
            size: self.zbuf.len() as u64,
            records: self.records,
        };
        header.write_bytes(inner)?;
        inner.write_all(&self.zbuf)?;

        self.ubuf.clear();
        self.records = 0;
        Ok(())
    }
}
