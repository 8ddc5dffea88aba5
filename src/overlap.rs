//! Overlap record type and bit-packed payload codec
//!
//! An overlap states that two reads align over some span, with unaligned
//! "hangs" at each end, an orientation flag, and a quantized error rate
//! (the *evalue*). On disk the payload is bit-packed into little-endian
//! `u64` words with explicit pack/unpack functions, so the layout is
//! identical on every platform.
//!
//! Payload field order (low bits first): `ahg5`, `ahg3`, `bhg5`, `bhg3`,
//! `span` (each `read_len_bits` wide), `evalue` (16 bits), then the four
//! usage/orientation flags (1 bit each).

use crate::error::{Result, WriteError};

/// Number of bits used for the fixed-point evalue
pub const EVALUE_BITS: u32 = 16;

/// Maximum representable evalue (fraction error 1.0)
pub const EVALUE_MAX: u16 = u16::MAX;

/// Evalue quantization scale
const EVALUE_SCALE: f64 = EVALUE_MAX as f64;

/// Number of single-bit flags packed after the evalue
const FLAG_BITS: u32 = 4;

/// Smallest supported hang bit-width (reads up to 2 kbp)
pub const MIN_READ_LEN_BITS: u32 = 11;

/// Largest supported hang bit-width (reads up to 16 Mbp)
pub const MAX_READ_LEN_BITS: u32 = 24;

/// Default hang bit-width (reads up to 2 Mbp)
pub const DEFAULT_READ_LEN_BITS: u32 = 21;

/// Upper bound on payload words for any supported bit-width
pub const MAX_PAYLOAD_WORDS: usize = 3;

/// Encodes a fraction error as a fixed-point evalue.
///
/// Out-of-range inputs saturate to the maximum representable value rather
/// than failing; the caller is allowed to request an error ceiling above
/// what the encoding can express.
#[must_use]
pub fn encode_evalue(erate: f64) -> u16 {
    if erate <= 0.0 {
        0
    } else if erate >= 1.0 {
        EVALUE_MAX
    } else {
        (erate * EVALUE_SCALE).round() as u16
    }
}

/// Decodes a fixed-point evalue back to a fraction error
#[must_use]
pub fn decode_evalue(evalue: u16) -> f64 {
    f64::from(evalue) / EVALUE_SCALE
}

/// A pairwise overlap between reads `a_id` and `b_id`.
///
/// Hangs are unaligned bases at a read's ends: `ahg5`/`ahg3` on the a-read,
/// `bhg5`/`bhg3` on the b-read, measured on the forward strand of each
/// read. `span` is the aligned length on the a-read.
///
/// Field order matters: records sort by `(a_id, b_id, remaining fields)`,
/// which the derived `Ord` provides directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Overlap {
    /// ID of the read this record is keyed by
    pub a_id: u32,
    /// ID of the other read
    pub b_id: u32,
    /// Unaligned bases at the 5' end of the a-read
    pub ahg5: u32,
    /// Unaligned bases at the 3' end of the a-read
    pub ahg3: u32,
    /// Unaligned bases at the 5' end of the b-read
    pub bhg5: u32,
    /// Unaligned bases at the 3' end of the b-read
    pub bhg3: u32,
    /// Aligned span on the a-read
    pub span: u32,
    /// Quantized fraction error
    pub evalue: u16,
    /// True if the b-read is reverse-complemented in the alignment
    pub flipped: bool,
    /// Usable for unitig construction
    pub for_utg: bool,
    /// Usable for overlap-based trimming
    pub for_obt: bool,
    /// Usable for duplicate detection
    pub for_dup: bool,
}

impl Overlap {
    /// Fraction error of this overlap
    #[must_use]
    pub fn erate(&self) -> f64 {
        decode_evalue(self.evalue)
    }

    /// Sets the error rate, saturating at the representable maximum
    pub fn set_erate(&mut self, erate: f64) {
        self.evalue = encode_evalue(erate);
    }

    /// Signed a-hang of a dovetail overlap (positive: a-read sticks out 5')
    #[must_use]
    pub fn a_hang(&self) -> i32 {
        self.ahg5 as i32 - self.bhg5 as i32
    }

    /// Signed b-hang of a dovetail overlap (positive: b-read sticks out 3')
    #[must_use]
    pub fn b_hang(&self) -> i32 {
        self.bhg3 as i32 - self.ahg3 as i32
    }

    /// True if the overlap hangs off the 5' end of the a-read
    #[must_use]
    pub fn a_end_is_5prime(&self) -> bool {
        self.bhg5 > 0 && self.ahg3 > 0
    }

    /// True if the overlap hangs off the 3' end of the a-read
    #[must_use]
    pub fn a_end_is_3prime(&self) -> bool {
        self.ahg5 > 0 && self.bhg3 > 0
    }

    /// True if the overlap hangs off the 5' end of the b-read
    #[must_use]
    pub fn b_end_is_5prime(&self) -> bool {
        (self.a_end_is_5prime() && self.flipped) || (self.a_end_is_3prime() && !self.flipped)
    }

    /// True if the overlap hangs off the 3' end of the b-read
    #[must_use]
    pub fn b_end_is_3prime(&self) -> bool {
        (self.a_end_is_5prime() && !self.flipped) || (self.a_end_is_3prime() && self.flipped)
    }

    /// True if the a-read is contained within the b-read
    #[must_use]
    pub fn a_is_contained(&self) -> bool {
        self.ahg5 == 0 && self.ahg3 == 0
    }

    /// True if the a-read contains the b-read
    #[must_use]
    pub fn a_is_container(&self) -> bool {
        self.bhg5 == 0 && self.bhg3 == 0
    }

    /// A coarse quality score: aligned span scaled down by the error rate.
    ///
    /// Used by the statistics module to approximate "score of the Nth best
    /// overlap" without loading all overlaps for a read.
    #[must_use]
    pub fn score(&self) -> u16 {
        let s = f64::from(self.span) * (1.0 - self.erate());
        if s >= f64::from(u16::MAX) {
            u16::MAX
        } else {
            s as u16
        }
    }

    /// Builds the mirrored counterpart of this overlap, keyed by the b-read.
    ///
    /// IDs swap; the hangs exchange ends according to orientation; the
    /// orientation, span, evalue and usage flags are preserved. Storing
    /// both directions is what makes a per-read query a single contiguous
    /// run keyed by the first ID.
    #[must_use]
    pub fn mirrored(&self) -> Overlap {
        let (ahg5, ahg3, bhg5, bhg3) = if self.flipped {
            (self.bhg3, self.bhg5, self.ahg3, self.ahg5)
        } else {
            (self.bhg5, self.bhg3, self.ahg5, self.ahg3)
        };
        Overlap {
            a_id: self.b_id,
            b_id: self.a_id,
            ahg5,
            ahg3,
            bhg5,
            bhg3,
            span: self.span,
            evalue: self.evalue,
            flipped: self.flipped,
            for_utg: self.for_utg,
            for_obt: self.for_obt,
            for_dup: self.for_dup,
        }
    }
}

/// Fixed payload layout for one store build.
///
/// The hang bit-width is chosen once (bounded by the configured maximum
/// read length) and recorded in the store info; every file in the store
/// packs and unpacks with the same layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    read_len_bits: u32,
    payload_words: usize,
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self::new(DEFAULT_READ_LEN_BITS)
    }
}

impl RecordLayout {
    /// Creates a layout for the given hang bit-width.
    ///
    /// # Panics
    ///
    /// Panics if the bit-width is outside the supported range; the width
    /// is a build-time configuration value, not runtime data.
    #[must_use]
    pub fn new(read_len_bits: u32) -> Self {
        assert!(
            (MIN_READ_LEN_BITS..=MAX_READ_LEN_BITS).contains(&read_len_bits),
            "read_len_bits must be within {MIN_READ_LEN_BITS}..={MAX_READ_LEN_BITS}"
        );
        let bits = 5 * read_len_bits + EVALUE_BITS + FLAG_BITS;
        Self {
            read_len_bits,
            payload_words: (bits as usize).div_ceil(64),
        }
    }

    /// Layout for a maximum read length in bases
    #[must_use]
    pub fn for_max_read_len(max_len: u32) -> Self {
        let bits = (32 - max_len.leading_zeros()).clamp(MIN_READ_LEN_BITS, MAX_READ_LEN_BITS);
        Self::new(bits)
    }

    /// The hang bit-width of this layout
    #[must_use]
    pub fn read_len_bits(&self) -> u32 {
        self.read_len_bits
    }

    /// Number of `u64` payload words per record
    #[must_use]
    pub fn payload_words(&self) -> usize {
        self.payload_words
    }

    /// Largest hang/span value this layout can store
    #[must_use]
    pub fn max_field(&self) -> u32 {
        (1u32 << self.read_len_bits) - 1
    }

    /// On-disk byte size of a Normal record (1 leading ID)
    #[must_use]
    pub fn normal_record_bytes(&self) -> usize {
        4 + 8 * self.payload_words
    }

    /// On-disk byte size of a Full record (2 leading IDs)
    #[must_use]
    pub fn full_record_bytes(&self) -> usize {
        8 + 8 * self.payload_words
    }

    /// Packs the payload fields of `ovl` into `words`.
    ///
    /// `words` must hold exactly [`RecordLayout::payload_words`] entries.
    /// Fails if any hang or the span does not fit the configured width.
    pub fn pack(&self, ovl: &Overlap, words: &mut [u64]) -> Result<()> {
        debug_assert_eq!(words.len(), self.payload_words);
        words.fill(0);

        let mut packer = BitPacker::new(words);
        for value in [ovl.ahg5, ovl.ahg3, ovl.bhg5, ovl.bhg3, ovl.span] {
            if value > self.max_field() {
                return Err(WriteError::FieldOverflow {
                    value,
                    bits: self.read_len_bits,
                }
                .into());
            }
            packer.push(u64::from(value), self.read_len_bits);
        }
        packer.push(u64::from(ovl.evalue), EVALUE_BITS);
        packer.push(u64::from(ovl.flipped), 1);
        packer.push(u64::from(ovl.for_utg), 1);
        packer.push(u64::from(ovl.for_obt), 1);
        packer.push(u64::from(ovl.for_dup), 1);
        Ok(())
    }

    /// Unpacks payload words into `ovl`, leaving the IDs untouched
    pub fn unpack(&self, words: &[u64], ovl: &mut Overlap) {
        debug_assert_eq!(words.len(), self.payload_words);

        let mut unpacker = BitUnpacker::new(words);
        ovl.ahg5 = unpacker.pull(self.read_len_bits) as u32;
        ovl.ahg3 = unpacker.pull(self.read_len_bits) as u32;
        ovl.bhg5 = unpacker.pull(self.read_len_bits) as u32;
        ovl.bhg3 = unpacker.pull(self.read_len_bits) as u32;
        ovl.span = unpacker.pull(self.read_len_bits) as u32;
        ovl.evalue = unpacker.pull(EVALUE_BITS) as u16;
        ovl.flipped = unpacker.pull(1) != 0;
        ovl.for_utg = unpacker.pull(1) != 0;
        ovl.for_obt = unpacker.pull(1) != 0;
        ovl.for_dup = unpacker.pull(1) != 0;
    }
}

/// Sequential bit writer over a word buffer, low bits first
struct BitPacker<'a> {
    words: &'a mut [u64],
    bit: usize,
}

impl<'a> BitPacker<'a> {
    fn new(words: &'a mut [u64]) -> Self {
        Self { words, bit: 0 }
    }

    fn push(&mut self, value: u64, bits: u32) {
        debug_assert!(bits == 64 || value < (1u64 << bits));
        let word = self.bit / 64;
        let shift = (self.bit % 64) as u32;
        self.words[word] |= value << shift;
        if shift + bits > 64 {
            // Field straddles a word boundary
            self.words[word + 1] |= value >> (64 - shift);
        }
        self.bit += bits as usize;
    }
}

/// Sequential bit reader over a word buffer, low bits first
struct BitUnpacker<'a> {
    words: &'a [u64],
    bit: usize,
}

impl<'a> BitUnpacker<'a> {
    fn new(words: &'a [u64]) -> Self {
        Self { words, bit: 0 }
    }

    fn pull(&mut self, bits: u32) -> u64 {
        let word = self.bit / 64;
        let shift = (self.bit % 64) as u32;
        let mut value = self.words[word] >> shift;
        if shift + bits > 64 {
            value |= self.words[word + 1] << (64 - shift);
        }
        self.bit += bits as usize;
        if bits == 64 {
            value
        } else {
            value & ((1u64 << bits) - 1)
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn random_overlap(rng: &mut SmallRng, layout: RecordLayout) -> Overlap {
        let max = layout.max_field();
        Overlap {
            a_id: rng.random_range(1..100_000),
            b_id: rng.random_range(1..100_000),
            ahg5: rng.random_range(0..=max),
            ahg3: rng.random_range(0..=max),
            bhg5: rng.random_range(0..=max),
            bhg3: rng.random_range(0..=max),
            span: rng.random_range(0..=max),
            evalue: rng.random(),
            flipped: rng.random(),
            for_utg: rng.random(),
            for_obt: rng.random(),
            for_dup: rng.random(),
        }
    }

    #[test]
    fn test_pack_roundtrip() {
        let mut rng = SmallRng::seed_from_u64(42);
        for bits in [MIN_READ_LEN_BITS, 16, DEFAULT_READ_LEN_BITS, MAX_READ_LEN_BITS] {
            let layout = RecordLayout::new(bits);
            let mut words = vec![0u64; layout.payload_words()];
            for _ in 0..500 {
                let ovl = random_overlap(&mut rng, layout);
                layout.pack(&ovl, &mut words).unwrap();

                let mut back = Overlap {
                    a_id: ovl.a_id,
                    b_id: ovl.b_id,
                    ..Overlap::default()
                };
                layout.unpack(&words, &mut back);
                assert_eq!(ovl, back);
            }
        }
    }

    #[test]
    fn test_pack_rejects_overflow() {
        let layout = RecordLayout::new(16);
        let ovl = Overlap {
            ahg5: layout.max_field() + 1,
            ..Overlap::default()
        };
        let mut words = vec![0u64; layout.payload_words()];
        assert!(layout.pack(&ovl, &mut words).is_err());
    }

    #[test]
    fn test_evalue_quantization() {
        for &e in &[0.0, 0.0001, 0.01, 0.15, 0.5, 0.9999, 1.0] {
            let q = decode_evalue(encode_evalue(e));
            assert!((q - e).abs() <= 1.0 / EVALUE_SCALE, "evalue {e} -> {q}");
        }
    }

    #[test]
    fn test_evalue_saturates() {
        assert_eq!(encode_evalue(1.5), EVALUE_MAX);
        assert_eq!(encode_evalue(-0.5), 0);
    }

    #[test]
    fn test_mirror_swaps_ids() {
        let ovl = Overlap {
            a_id: 5,
            b_id: 9,
            ahg5: 100,
            ahg3: 0,
            bhg5: 0,
            bhg3: 80,
            span: 900,
            evalue: encode_evalue(0.02),
            flipped: false,
            for_utg: true,
            ..Overlap::default()
        };
        let m = ovl.mirrored();
        assert_eq!(m.a_id, 9);
        assert_eq!(m.b_id, 5);
        assert_eq!(m.ahg5, 0);
        assert_eq!(m.ahg3, 80);
        assert_eq!(m.bhg5, 100);
        assert_eq!(m.bhg3, 0);
        assert_eq!(m.span, ovl.span);
        assert!(m.for_utg);
    }

    #[test]
    fn test_mirror_involution() {
        let mut rng = SmallRng::seed_from_u64(7);
        let layout = RecordLayout::default();
        for _ in 0..200 {
            let ovl = random_overlap(&mut rng, layout);
            assert_eq!(ovl.mirrored().mirrored(), ovl);
        }
    }

    #[test]
    fn test_mirror_flipped_exchanges_opposite_ends() {
        let ovl = Overlap {
            a_id: 1,
            b_id: 2,
            ahg5: 10,
            ahg3: 20,
            bhg5: 30,
            bhg3: 40,
            flipped: true,
            ..Overlap::default()
        };
        let m = ovl.mirrored();
        assert_eq!(m.ahg5, 40);
        assert_eq!(m.ahg3, 30);
        assert_eq!(m.bhg5, 20);
        assert_eq!(m.bhg3, 10);
    }

    #[test]
    fn test_sort_keyed_by_a_then_b() {
        let a = Overlap {
            a_id: 1,
            b_id: 9,
            ..Overlap::default()
        };
        let b = Overlap {
            a_id: 2,
            b_id: 1,
            ..Overlap::default()
        };
        let c = Overlap {
            a_id: 2,
            b_id: 3,
            ..Overlap::default()
        };
        let mut v = vec![c, b, a];
        v.sort();
        assert_eq!(v, vec![a, b, c]);
    }

    #[test]
    fn test_dovetail_hangs() {
        let ovl = Overlap {
            ahg5: 50,
            bhg3: 70,
            ..Overlap::default()
        };
        assert_eq!(ovl.a_hang(), 50);
        assert_eq!(ovl.b_hang(), 70);
        assert!(ovl.a_is_container());
        assert!(!ovl.a_is_contained());

        // a sticks out 5', b sticks out 3': the overlap covers a's 3' end.
        assert!(ovl.a_end_is_3prime());
        assert!(!ovl.a_end_is_5prime());
        assert!(ovl.b_end_is_5prime());
        let flipped = Overlap {
            flipped: true,
            ..ovl
        };
        assert!(flipped.b_end_is_3prime());
    }

    #[test]
    fn test_layout_word_counts() {
        assert_eq!(RecordLayout::new(16).payload_words(), 2);
        assert_eq!(RecordLayout::new(21).payload_words(), 2);
        assert_eq!(RecordLayout::new(24).payload_words(), 3);
    }

    #[test]
    fn test_layout_for_max_read_len() {
        assert_eq!(RecordLayout::for_max_read_len(50_000).read_len_bits(), 16);
        assert_eq!(
            RecordLayout::for_max_read_len(2_000_000).read_len_bits(),
            DEFAULT_READ_LEN_BITS
        );
    }
}
