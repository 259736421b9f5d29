use super::{base_code, kmer_mask, validate_k, Kmer};
use crate::error::KmerError;

/// Forward and reverse-complement encodings of one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerPair {
    pub forward: Kmer,
    pub reverse: Kmer,
}

/// Fixed-length sliding window over a stream of bases
///
/// Each [`push`](KmerRing::push) shifts one base in and one base out in O(1),
/// updating the forward and reverse-complement k-mers incrementally. The ring
/// remembers which slots currently hold invalid bases and keeps a counter of
/// them; the window is only usable while that counter is zero.
#[derive(Debug, Clone)]
pub struct KmerRing {
    k: usize,
    mask: u64,
    /// Shift placing a complemented base at the front of the reverse k-mer
    rev_shift: u32,
    forward: Kmer,
    reverse: Kmer,
    invalid: Vec<bool>,
    pos: usize,
    filled: usize,
    invalid_count: usize,
}
impl KmerRing {
    pub fn new(k: usize) -> Result<Self, KmerError> {
        validate_k(k)?;
        Ok(Self {
            k,
            mask: kmer_mask(k),
            rev_shift: 2 * (k as u32 - 1),
            forward: 0,
            reverse: 0,
            invalid: vec![false; k],
            pos: 0,
            filled: 0,
            invalid_count: 0,
        })
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Empties the window
    pub fn reset(&mut self) {
        self.forward = 0;
        self.reverse = 0;
        self.invalid.fill(false);
        self.pos = 0;
        self.filled = 0;
        self.invalid_count = 0;
    }

    /// Slides one base into the window
    ///
    /// Returns whether the window is now full and free of invalid bases.
    #[inline]
    pub fn push(&mut self, base: u8) -> bool {
        let slot = self.pos;
        if self.filled == self.k {
            if self.invalid[slot] {
                self.invalid_count -= 1;
            }
        } else {
            self.filled += 1;
        }

        let code = if let Some(code) = base_code(base) {
            self.invalid[slot] = false;
            u64::from(code)
        } else {
            self.invalid[slot] = true;
            self.invalid_count += 1;
            0
        };

        self.forward = ((self.forward << 2) | code) & self.mask;
        self.reverse = (self.reverse >> 2) | ((code ^ 0b11) << self.rev_shift);

        self.pos += 1;
        if self.pos == self.k {
            self.pos = 0;
        }
        self.is_valid()
    }

    /// Whether the window holds k bases
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.filled == self.k
    }

    /// Whether the window holds k bases and none of them is invalid
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.filled == self.k && self.invalid_count == 0
    }

    /// Number of invalid bases currently inside the window
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.invalid_count
    }

    /// Current encodings, if the window is valid
    #[inline]
    #[must_use]
    pub fn pair(&self) -> Option<KmerPair> {
        if self.is_valid() {
            Some(KmerPair {
                forward: self.forward,
                reverse: self.reverse,
            })
        } else {
            None
        }
    }
}

/// Iterates over every window offset of a sequence
///
/// Yields `(offset, Some(pair))` for valid windows and `(offset, None)` for
/// windows containing a non-`ACGT` base, so callers can tell gaps apart from
/// the end of the sequence.
pub struct KmerScanner<'a> {
    seq: &'a [u8],
    ring: KmerRing,
    next: usize,
}
impl<'a> KmerScanner<'a> {
    pub fn new(seq: &'a [u8], k: usize) -> Result<Self, KmerError> {
        Ok(Self {
            seq,
            ring: KmerRing::new(k)?,
            next: 0,
        })
    }

    /// Number of windows the scanner will yield
    #[must_use]
    pub fn num_windows(&self) -> usize {
        (self.seq.len() + 1).saturating_sub(self.ring.k())
    }

    /// Only the valid windows
    pub fn valid(self) -> impl Iterator<Item = (usize, KmerPair)> + 'a {
        self.filter_map(|(offset, pair)| pair.map(|p| (offset, p)))
    }
}
impl Iterator for KmerScanner<'_> {
    type Item = (usize, Option<KmerPair>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.seq.len() {
            self.ring.push(self.seq[self.next]);
            self.next += 1;
            if self.ring.is_full() {
                return Some((self.next - self.ring.k(), self.ring.pair()));
            }
        }
        None
    }
}
