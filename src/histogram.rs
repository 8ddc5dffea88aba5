//! Store statistics: the evalue-by-length histogram and per-read score
//! curves
//!
//! Two QC structures accumulate while sorted overlaps stream into the
//! store:
//!
//! - a 2D count matrix over (evalue bucket, overlap length bucket), with
//!   rows allocated only for evalue buckets that actually occur;
//! - for each read, a sparse sample of its descending overlap-score
//!   list (16 `(rank, score)` points) which lets a consumer estimate
//!   "the score of the Nth best overlap" without loading any overlaps.
//!
//! Each sorter job builds statistics for its own slice; the indexer
//! merges them into the store-wide `statistics` file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{BuildError, FormatError, Result};
use crate::overlap::{Overlap, EVALUE_MAX};
use crate::readlen::ReadLengths;

/// Statistics file magic: "OVLSTATS" in ASCII (little-endian)
const MAGIC: u64 = 0x53544154534c564f;

/// Current statistics format version
const VERSION: u8 = 1;

/// Sample points kept per read's score curve
pub const SCORE_POINTS: usize = 16;

/// Evalues per histogram bucket (4096 rows over the 16-bit range)
const EVALUES_PER_BUCKET: u32 = 16;

/// Bases per histogram length bucket
const BASES_PER_BUCKET: u32 = 250;

/// Sampled score curve for one read: `scores[i]` is the score of the
/// overlap at rank `points[i]` in the read's descending score list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreCurve {
    pub points: [u16; SCORE_POINTS],
    pub scores: [u16; SCORE_POINTS],
}

/// Accumulated statistics for one slice or one whole store.
pub struct OverlapHistogram {
    bgn_id: u32,
    end_id: u32,
    max_id: u32,

    epb: u32,
    bpb: u32,
    opel_len: u32,
    /// Rows indexed by evalue bucket; allocated on first hit
    opel: Vec<Option<Box<[u32]>>>,

    /// Score curves indexed directly by read ID
    scores: Vec<ScoreCurve>,

    /// Scores of the read currently streaming in
    pending: Vec<u16>,
    pending_id: u32,
}

impl OverlapHistogram {
    /// Empty statistics for a store covering reads `1..=max_id`.
    ///
    /// `max_read_len` sizes the length axis; overlaps may run up to 40%
    /// longer than a read through insertions.
    #[must_use]
    pub fn new(max_id: u32, max_read_len: u32) -> Self {
        let opel_len = (max_read_len * 14 / 10) / BASES_PER_BUCKET + 1;
        let rows = (u32::from(EVALUE_MAX) / EVALUES_PER_BUCKET + 1) as usize;
        Self {
            bgn_id: u32::MAX,
            end_id: 0,
            max_id,
            epb: EVALUES_PER_BUCKET,
            bpb: BASES_PER_BUCKET,
            opel_len,
            opel: vec![None; rows],
            scores: vec![ScoreCurve::default(); max_id as usize + 1],
            pending: Vec::new(),
            pending_id: 0,
        }
    }

    /// First read ID with data
    #[must_use]
    pub fn bgn_id(&self) -> u32 {
        self.bgn_id
    }

    /// Last read ID with data
    #[must_use]
    pub fn end_id(&self) -> u32 {
        self.end_id
    }

    /// Accounts one overlap.
    ///
    /// Overlaps must arrive sorted by `a_id`, the same order the sorter
    /// and sequential writer emit them, so the per-read score list can
    /// be finalized when the ID advances.
    pub fn add_overlap<L: ReadLengths>(&mut self, ovl: &Overlap, lengths: &L) {
        debug_assert!(self.bgn_id == u32::MAX || ovl.a_id >= self.pending_id);

        self.bgn_id = self.bgn_id.min(ovl.a_id);
        self.end_id = self.end_id.max(ovl.a_id);

        // Evalue x length matrix.
        let alen = lengths.read_length(ovl.a_id);
        let blen = lengths.read_length(ovl.b_id);
        let len = (alen.saturating_sub(ovl.ahg5 + ovl.ahg3)
            + blen.saturating_sub(ovl.bhg5 + ovl.bhg3))
            / 2;

        let ev = (u32::from(ovl.evalue) / self.epb) as usize;
        let len_bucket = (len / self.bpb) as usize;
        let opel_len = self.opel_len as usize;
        let row = self.opel[ev].get_or_insert_with(|| vec![0; opel_len].into());
        if len_bucket < row.len() {
            row[len_bucket] += 1;
        }

        // Score curve for the current read.
        if ovl.a_id != self.pending_id {
            self.process_pending();
            self.pending_id = ovl.a_id;
        }
        self.pending.push(ovl.score());
    }

    /// Finalizes the last read's pending scores; call once after the
    /// final overlap
    pub fn finish(&mut self) {
        self.process_pending();
    }

    /// Samples the pending score list into the per-read curve
    fn process_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        self.pending.sort_unstable_by(|a, b| b.cmp(a));

        let n = self.pending.len();
        let step = ((n as f64) / SCORE_POINTS as f64).clamp(1.0, 10.0);

        let curve = &mut self.scores[self.pending_id as usize];
        for i in 0..SCORE_POINTS {
            curve.points[i] = (n - 1) as u16;
        }
        let mut point = 0.0f64;
        let mut i = 0;
        while i < SCORE_POINTS - 1 && (point as usize) < n {
            curve.points[i] = point.round() as u16;
            point += step;
            i += 1;
        }
        for i in 0..SCORE_POINTS {
            curve.scores[i] = self.pending[curve.points[i] as usize];
        }

        self.pending.clear();
    }

    /// Estimates the score of the overlap at rank `coverage` for `id`
    /// by linear interpolation over the sampled curve.
    ///
    /// Reads outside the histogram's range (and rank 0) report the best
    /// possible score; ranks beyond the read's overlap count report 0.
    #[must_use]
    pub fn score_estimate(&self, id: u32, coverage: u32) -> u16 {
        if id < self.bgn_id || id > self.end_id || coverage == 0 {
            return u16::MAX;
        }

        let curve = &self.scores[id as usize];
        if u32::from(curve.points[SCORE_POINTS - 1]) < coverage {
            return 0;
        }

        let mut cp = 1;
        while cp < SCORE_POINTS && u32::from(curve.points[cp]) < coverage {
            cp += 1;
        }

        let x = f64::from(curve.points[cp] - curve.points[cp - 1]);
        let y = f64::from(curve.scores[cp]) - f64::from(curve.scores[cp - 1]);
        let base = f64::from(curve.scores[cp - 1]);
        let score = if x == 0.0 {
            base
        } else {
            base + y / x * f64::from(coverage - u32::from(curve.points[cp - 1]))
        };
        score.clamp(0.0, f64::from(u16::MAX)).floor() as u16
    }

    /// Folds another histogram (typically one slice's) into this one.
    ///
    /// Score curves occupy disjoint ID ranges across slices, so copying
    /// is overlap-free; matrix rows add element-wise.
    pub fn merge(&mut self, other: &OverlapHistogram) -> Result<()> {
        if self.epb != other.epb
            || self.bpb != other.bpb
            || self.opel_len != other.opel_len
            || self.max_id != other.max_id
        {
            return Err(BuildError::HistogramMismatch.into());
        }

        for (mine, theirs) in self.opel.iter_mut().zip(&other.opel) {
            if let Some(theirs) = theirs {
                let row = mine.get_or_insert_with(|| vec![0; theirs.len()].into());
                for (m, t) in row.iter_mut().zip(theirs.iter()) {
                    *m += t;
                }
            }
        }

        if other.bgn_id != u32::MAX {
            let bgn = other.bgn_id as usize;
            let end = other.end_id as usize;
            self.scores[bgn..=end].copy_from_slice(&other.scores[bgn..=end]);
            self.bgn_id = self.bgn_id.min(other.bgn_id);
            self.end_id = self.end_id.max(other.end_id);
        }
        Ok(())
    }

    /// Count in the (evalue bucket, length bucket) cell
    #[must_use]
    pub fn cell(&self, evalue: u16, length: u32) -> u32 {
        let ev = (u32::from(evalue) / self.epb) as usize;
        let lb = (length / self.bpb) as usize;
        self.opel[ev]
            .as_ref()
            .and_then(|row| row.get(lb).copied())
            .unwrap_or(0)
    }

    /// Writes the statistics file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = File::create(path).map(BufWriter::new)?;

        writer.write_u64::<LittleEndian>(MAGIC)?;
        writer.write_u8(VERSION)?;
        writer.write_u32::<LittleEndian>(self.bgn_id)?;
        writer.write_u32::<LittleEndian>(self.end_id)?;
        writer.write_u32::<LittleEndian>(self.max_id)?;
        writer.write_u32::<LittleEndian>(self.epb)?;
        writer.write_u32::<LittleEndian>(self.bpb)?;
        writer.write_u32::<LittleEndian>(self.opel_len)?;

        let rows = self.opel.iter().filter(|r| r.is_some()).count() as u32;
        writer.write_u32::<LittleEndian>(rows)?;
        for (ev, row) in self.opel.iter().enumerate() {
            if let Some(row) = row {
                writer.write_u32::<LittleEndian>(ev as u32)?;
                for &count in row.iter() {
                    writer.write_u32::<LittleEndian>(count)?;
                }
            }
        }

        if self.bgn_id != u32::MAX {
            for curve in &self.scores[self.bgn_id as usize..=self.end_id as usize] {
                for &p in &curve.points {
                    writer.write_u16::<LittleEndian>(p)?;
                }
                for &s in &curve.scores {
                    writer.write_u16::<LittleEndian>(s)?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Loads a statistics file written by [`OverlapHistogram::save`]
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

        let bgn_id = reader.read_u32::<LittleEndian>()?;
        let end_id = reader.read_u32::<LittleEndian>()?;
        let max_id = reader.read_u32::<LittleEndian>()?;
        let epb = reader.read_u32::<LittleEndian>()?;
        let bpb = reader.read_u32::<LittleEndian>()?;
        let opel_len = reader.read_u32::<LittleEndian>()?;

        let num_rows = reader.read_u32::<LittleEndian>()?;
        let rows = (u32::from(EVALUE_MAX) / epb + 1) as usize;
        let mut opel = vec![None; rows];
        for _ in 0..num_rows {
            let ev = reader.read_u32::<LittleEndian>()? as usize;
            let mut row = vec![0u32; opel_len as usize];
            reader.read_u32_into::<LittleEndian>(&mut row)?;
            opel[ev] = Some(row.into());
        }

        let mut scores = vec![ScoreCurve::default(); max_id as usize + 1];
        if bgn_id != u32::MAX {
            for curve in &mut scores[bgn_id as usize..=end_id as usize] {
                reader.read_u16_into::<LittleEndian>(&mut curve.points)?;
                reader.read_u16_into::<LittleEndian>(&mut curve.scores)?;
            }
        }

        Ok(Self {
            bgn_id,
            end_id,
            max_id,
            epb,
            bpb,
            opel_len,
            opel,
            scores,
            pending: Vec::new(),
            pending_id: 0,
        })
    }
}
