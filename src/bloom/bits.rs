use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::segmented::{BigArray, Regime};

/// A bit vector of atomic words, small or segmented
///
/// Bits are set with `fetch_or`, so concurrent writers never lose each other's
/// bits and readers need no lock.
#[derive(Debug)]
pub struct BitVector {
    words: BigArray<AtomicU64>,
}
impl BitVector {
    /// Allocates at least `bits` zeroed bits
    #[must_use]
    pub fn new(bits: u64, regime: Option<Regime>) -> Self {
        let num_words = bits.div_ceil(64) as usize;
        let regime = regime.unwrap_or_else(|| Regime::for_len(num_words));
        Self {
            words: BigArray::with_regime(num_words, regime, || AtomicU64::new(0)),
        }
    }

    /// Reads `num_words` little-endian words
    pub fn read_words<R: Read>(reader: &mut R, num_words: usize) -> io::Result<Self> {
        let words = BigArray::try_from_fn(num_words, Regime::for_len(num_words), || {
            reader.read_u64::<LittleEndian>().map(AtomicU64::new)
        })?;
        Ok(Self { words })
    }

    /// Number of addressable bits
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.words.len() as u64 * 64
    }

    #[must_use]
    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn regime(&self) -> Regime {
        self.words.regime()
    }

    /// Sets a bit and returns whether it was previously unset
    #[inline]
    pub fn set(&self, bit: u64) -> bool {
        let mask = 1u64 << (bit & 63);
        let prev = self.words.get((bit >> 6) as usize).fetch_or(mask, Ordering::Relaxed);
        prev & mask == 0
    }

    #[inline]
    #[must_use]
    pub fn get(&self, bit: u64) -> bool {
        let mask = 1u64 << (bit & 63);
        self.words.get((bit >> 6) as usize).load(Ordering::Relaxed) & mask != 0
    }

    /// Zeroes every bit, keeping the allocation
    pub fn clear(&mut self) {
        for chunk in self.words.chunks_mut() {
            for word in chunk {
                *word.get_mut() = 0;
            }
        }
    }

    /// Number of set bits
    #[must_use]
    pub fn count_ones(&self) -> u64 {
        self.words
            .iter()
            .map(|w| u64::from(w.load(Ordering::Relaxed).count_ones()))
            .sum()
    }

    #[inline]
    #[must_use]
    pub fn word(&self, index: usize) -> u64 {
        self.words.get(index).load(Ordering::Relaxed)
    }
}
