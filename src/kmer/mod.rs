//! K-mer encoding and decoding
//!
//! A k-mer is packed into a `u64` with 2 bits per base (`A=00`, `C=01`, `G=10`,
//! `T=11`). The first base of the window occupies the highest used bits, so two
//! k-mers of the same length compare in lexicographic order.
//!
//! Every window has two encodings: the forward one and the reverse-complement
//! one. Both are produced directly from the window bytes (or incrementally by
//! [`KmerRing`]) so that both strands can be tested without re-reading the raw
//! sequence.

mod ring;

pub use ring::{KmerPair, KmerRing, KmerScanner};

use crate::error::KmerError;

/// A 2-bit packed k-mer
pub type Kmer = u64;

/// Largest k representable in a 64-bit k-mer
pub const MAX_K: usize = 32;

/// Smallest k recommended for taxonomic classification
///
/// Shorter k-mers are accepted by the codec and index but are rarely specific
/// enough to identify a taxon.
pub const MIN_RECOMMENDED_K: usize = 15;

/// Marker for bytes that are not nucleotides
const INVALID: u8 = 0xFF;

/// ASCII to 2-bit lookup table; lowercase bases are normalized
static BASE_LUT: [u8; 256] = {
    let mut t = [INVALID; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t
};

/// 2-bit code to ASCII
const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Strand of a k-mer encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Bases in read order
    #[default]
    Forward,
    /// Complemented bases in reverse order
    Reverse,
}

/// Returns the 2-bit code of a nucleotide, or `None` for anything but `ACGT`
#[inline]
#[must_use]
pub fn base_code(base: u8) -> Option<u8> {
    let code = BASE_LUT[base as usize];
    if code == INVALID { None } else { Some(code) }
}

/// Checks that `k` fits in a 64-bit k-mer
pub fn validate_k(k: usize) -> Result<(), KmerError> {
    if k == 0 || k > MAX_K {
        Err(KmerError::InvalidK { k, max: MAX_K })
    } else {
        Ok(())
    }
}

/// Mask covering the lower `2k` bits
#[inline]
#[must_use]
pub fn kmer_mask(k: usize) -> u64 {
    if k >= MAX_K {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

/// Encodes a window of bases into a k-mer of length `window.len()`
///
/// # Arguments
///
/// * `window` - ASCII nucleotides; `k` is the window length
/// * `orientation` - Forward encoding or reverse-complement encoding
///
/// # Returns
///
/// * `Ok(kmer)` - The packed k-mer
/// * `Err(KmerError::InvalidBase)` - The offset of the first non-`ACGT` byte
/// * `Err(KmerError::InvalidK)` - The window is empty or longer than [`MAX_K`]
///
/// # Example
///
/// ```
/// use kmertax::kmer::{encode, Orientation};
///
/// assert_eq!(encode(b"ACGT", Orientation::Forward).unwrap(), 0b00_01_10_11);
/// // ACGT is its own reverse complement
/// assert_eq!(encode(b"ACGT", Orientation::Reverse).unwrap(), 0b00_01_10_11);
/// assert!(encode(b"ACNT", Orientation::Forward).is_err());
/// ```
pub fn encode(window: &[u8], orientation: Orientation) -> Result<Kmer, KmerError> {
    validate_k(window.len())?;
    let mut kmer = 0u64;
    match orientation {
        Orientation::Forward => {
            for (offset, &base) in window.iter().enumerate() {
                let code = base_code(base).ok_or(KmerError::InvalidBase { offset, base })?;
                kmer = (kmer << 2) | u64::from(code);
            }
        }
        Orientation::Reverse => {
            // report the first invalid offset in read order, not scan order
            if let Some(offset) = window.iter().position(|&b| base_code(b).is_none()) {
                return Err(KmerError::InvalidBase {
                    offset,
                    base: window[offset],
                });
            }
            for &base in window.iter().rev() {
                let code = BASE_LUT[base as usize] ^ 0b11;
                kmer = (kmer << 2) | u64::from(code);
            }
        }
    }
    Ok(kmer)
}

/// Decodes a forward k-mer of length `k` into `output` (cleared first)
pub fn decode_into(kmer: Kmer, k: usize, output: &mut Vec<u8>) {
    output.clear();
    output.extend((0..k).rev().map(|i| BASES[((kmer >> (2 * i)) & 0b11) as usize]));
}

/// Decodes a forward k-mer of length `k`
#[must_use]
pub fn decode(kmer: Kmer, k: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(k);
    decode_into(kmer, k, &mut output);
    output
}

/// Reverse complement of an encoded k-mer of length `k`
#[must_use]
pub fn reverse_complement(kmer: Kmer, k: usize) -> Kmer {
    let complement = !kmer & kmer_mask(k);
    let mut rc = 0u64;
    for i in 0..k {
        rc = (rc << 2) | ((complement >> (2 * i)) & 0b11);
    }
    rc
}

/// Whether the k-mer equals its own reverse complement
#[inline]
#[must_use]
pub fn is_palindrome(kmer: Kmer, k: usize) -> bool {
    kmer == reverse_complement(kmer, k)
}
