//! Bloom filter prefilter for k-mer lookups
//!
//! The filter answers "definitely absent" or "maybe present" for a k-mer and
//! gates the binary searches of the [`KmerIndex`](crate::KmerIndex). It never
//! reports a false negative; false positives occur at roughly the configured
//! rate once the filter holds its expected number of insertions.
//!
//! Sizing follows the usual optimum for `n` insertions at false positive
//! probability `p`:
//!
//! ```text
//! m = ceil(-n * ln(p) / ln(2)^2)      bits
//! h = max(1, round(m / n * ln(2)))    hash functions
//! ```
//!
//! Each hash function is the configured [`HashStrategy`] applied to the k-mer
//! and one seed. Seeds are drawn from a fixed RNG seed, so two filters with the
//! same sizing hash identically.

mod bits;
mod hash;

pub use bits::BitVector;
pub use hash::{fmix64, HashStrategy};

use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    error::{FilterError, LoadError, Result},
    segmented::Regime,
    RNG_SEED,
};

/// Computes the optimal number of bits for `n` insertions at fpp `p`
#[must_use]
pub fn optimal_bits(expected_insertions: u64, fpp: f64) -> u64 {
    let ln2 = std::f64::consts::LN_2;
    let m = -(expected_insertions as f64) * fpp.ln() / (ln2 * ln2);
    (m.ceil() as u64).max(64)
}

/// Computes the optimal number of hash functions for `n` insertions into `m` bits
#[must_use]
pub fn optimal_hashes(expected_insertions: u64, bits: u64) -> u32 {
    let h = (bits as f64 / expected_insertions as f64) * std::f64::consts::LN_2;
    (h.round() as u32).max(1)
}

/// Upper bound on hash functions in a persisted filter
///
/// Sizing never asks for more than `log2(1 / fpp)` functions, which stays
/// below 1100 for every positive `f64`.
pub const MAX_HASHES: u32 = 2048;

fn generate_seeds(count: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(RNG_SEED);
    (0..count).map(|_| rng.random::<u64>()).collect()
}

fn validate(expected_insertions: u64, fpp: f64) -> std::result::Result<(), FilterError> {
    if expected_insertions == 0 || !(fpp > 0.0 && fpp < 1.0) {
        Err(FilterError::InvalidParameters {
            expected_insertions,
            fpp,
        })
    } else {
        Ok(())
    }
}

/// A bloom filter over 64-bit k-mers
///
/// `put` and `contains` take `&self`: bits are set atomically and the entry
/// counter is an atomic, so the filter can be filled from several threads.
#[derive(Debug)]
pub struct BloomFilter {
    strategy: HashStrategy,
    bits: BitVector,
    /// Number of bits actually addressed; may be below the allocation
    bit_size: u64,
    seeds: Vec<u64>,
    expected_insertions: u64,
    fpp: f64,
    entries: AtomicU64,
    /// Forces the segmented regime (used for huge filters and in tests)
    segment_bits: Option<u32>,
}
impl BloomFilter {
    /// Creates a filter sized for `expected_insertions` at `fpp`
    pub fn new(expected_insertions: u64, fpp: f64, strategy: HashStrategy) -> Result<Self> {
        Self::build(expected_insertions, fpp, strategy, None)
    }

    /// Creates a filter whose bit vector is always segmented
    pub fn segmented(
        expected_insertions: u64,
        fpp: f64,
        strategy: HashStrategy,
        segment_bits: u32,
    ) -> Result<Self> {
        Self::build(expected_insertions, fpp, strategy, Some(segment_bits))
    }

    fn build(
        expected_insertions: u64,
        fpp: f64,
        strategy: HashStrategy,
        segment_bits: Option<u32>,
    ) -> Result<Self> {
        validate(expected_insertions, fpp)?;
        let bit_size = optimal_bits(expected_insertions, fpp);
        let hashes = optimal_hashes(expected_insertions, bit_size);
        Ok(Self {
            strategy,
            bits: BitVector::new(bit_size, segment_bits.map(Regime::segmented)),
            bit_size,
            seeds: generate_seeds(hashes as usize),
            expected_insertions,
            fpp,
            entries: AtomicU64::new(0),
            segment_bits,
        })
    }

    /// Resizes the filter for a new workload and empties it
    ///
    /// The bit vector is reallocated and the seeds regenerated only when the new
    /// requirement exceeds what is already allocated. Otherwise the existing
    /// allocation is cleared and reused.
    pub fn ensure_capacity(&mut self, expected_insertions: u64, fpp: f64) -> Result<()> {
        validate(expected_insertions, fpp)?;
        let bit_size = optimal_bits(expected_insertions, fpp);
        let hashes = optimal_hashes(expected_insertions, bit_size) as usize;

        if bit_size > self.bits.capacity() {
            tracing::debug!(
                bits = bit_size,
                previous = self.bits.capacity(),
                "reallocating prefilter"
            );
            self.bits = BitVector::new(bit_size, self.segment_bits.map(Regime::segmented));
        } else {
            self.bits.clear();
        }
        if hashes > self.seeds.len() {
            self.seeds = generate_seeds(hashes);
        } else {
            self.seeds.truncate(hashes);
        }

        self.bit_size = bit_size;
        self.expected_insertions = expected_insertions;
        self.fpp = fpp;
        *self.entries.get_mut() = 0;
        Ok(())
    }

    #[inline]
    fn position(&self, kmer: u64, seed: u64) -> u64 {
        self.strategy.hash(kmer, seed) % self.bit_size
    }

    /// Adds a k-mer; returns whether any bit changed
    #[inline]
    pub fn put(&self, kmer: u64) -> bool {
        let mut changed = false;
        for &seed in &self.seeds {
            changed |= self.bits.set(self.position(kmer, seed));
        }
        self.entries.fetch_add(1, Ordering::Relaxed);
        changed
    }

    /// Tests a k-mer; `false` means it was never added
    #[inline]
    #[must_use]
    pub fn contains(&self, kmer: u64) -> bool {
        self.seeds
            .iter()
            .all(|&seed| self.bits.get(self.position(kmer, seed)))
    }

    /// Empties the filter without changing its sizing
    pub fn clear(&mut self) {
        self.bits.clear();
        *self.entries.get_mut() = 0;
    }

    /// Number of `put` calls since the last clear
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bit_size(&self) -> u64 {
        self.bit_size
    }

    #[must_use]
    pub fn hash_count(&self) -> usize {
        self.seeds.len()
    }

    #[must_use]
    pub fn strategy(&self) -> HashStrategy {
        self.strategy
    }

    #[must_use]
    pub fn expected_insertions(&self) -> u64 {
        self.expected_insertions
    }

    #[must_use]
    pub fn target_fpp(&self) -> f64 {
        self.fpp
    }

    #[must_use]
    pub fn regime(&self) -> Regime {
        self.bits.regime()
    }

    /// Theoretical false positive rate at the current load
    #[must_use]
    pub fn expected_fpp(&self) -> f64 {
        let h = self.seeds.len() as f64;
        let n = self.entries() as f64;
        let m = self.bit_size as f64;
        (1.0 - (-h * n / m).exp()).powf(h)
    }

    /// Serializes the filter sizing, seeds and bit words
    ///
    /// ```text
    /// strategy u8, hash_count u32, bit_size u64, expected_insertions u64,
    /// fpp f64, entries u64, seeds [u64; hash_count],
    /// words u64 (= ceil(bit_size / 64)), [u64; words]
    /// ```
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.strategy.as_u8())?;
        writer.write_u32::<LittleEndian>(self.seeds.len() as u32)?;
        writer.write_u64::<LittleEndian>(self.bit_size)?;
        writer.write_u64::<LittleEndian>(self.expected_insertions)?;
        writer.write_f64::<LittleEndian>(self.fpp)?;
        writer.write_u64::<LittleEndian>(self.entries())?;
        self.seeds
            .iter()
            .try_for_each(|&s| writer.write_u64::<LittleEndian>(s))?;
        // words past `bit_size` are never addressed
        let words = self.bit_size.div_ceil(64);
        writer.write_u64::<LittleEndian>(words)?;
        (0..words as usize).try_for_each(|i| writer.write_u64::<LittleEndian>(self.bits.word(i)))?;
        Ok(())
    }

    /// Deserializes a filter written by [`write_to`](Self::write_to)
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let tag = reader.read_u8()?;
        let strategy = HashStrategy::from_u8(tag)
            .ok_or_else(|| LoadError::Corrupt(format!("unknown hash strategy tag {tag}")))?;
        let hashes = reader.read_u32::<LittleEndian>()?;
        let bit_size = reader.read_u64::<LittleEndian>()?;
        let expected_insertions = reader.read_u64::<LittleEndian>()?;
        let fpp = reader.read_f64::<LittleEndian>()?;
        let entries = reader.read_u64::<LittleEndian>()?;
        if hashes == 0 || bit_size == 0 {
            return Err(LoadError::Corrupt("empty prefilter".to_string()).into());
        }
        if hashes > MAX_HASHES {
            return Err(LoadError::Corrupt(format!(
                "prefilter uses {hashes} hash functions, at most {MAX_HASHES} are supported"
            ))
            .into());
        }
        validate(expected_insertions, fpp).map_err(|e| LoadError::Corrupt(e.to_string()))?;

        let mut seeds = Vec::with_capacity(hashes as usize);
        for _ in 0..hashes {
            seeds.push(reader.read_u64::<LittleEndian>()?);
        }

        let num_words = reader.read_u64::<LittleEndian>()?;
        if num_words != bit_size.div_ceil(64) {
            return Err(LoadError::Corrupt(format!(
                "prefilter holds {num_words} words but addresses {bit_size} bits"
            ))
            .into());
        }
        let num_words = usize::try_from(num_words).map_err(|_| {
            LoadError::Corrupt(format!("prefilter of {bit_size} bits is not addressable"))
        })?;
        let bits = BitVector::read_words(reader, num_words)?;

        Ok(Self {
            strategy,
            bits,
            bit_size,
            seeds,
            expected_insertions,
            fpp,
            entries: AtomicU64::new(entries),
            segment_bits: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed(i: u64) -> u64 {
        // spread sequential integers over the k-mer space
        fmix64(i.wrapping_add(0x9E37_79B9_7F4A_7C15))
    }

    #[test]
    fn test_sizing_formulas() {
        let m = optimal_bits(100_000, 0.0001);
        // 19.17 bits per element
        assert!((1_900_000..1_930_000).contains(&m));
        assert_eq!(optimal_hashes(100_000, m), 13);
        assert_eq!(optimal_hashes(100, 64), 1);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(BloomFilter::new(0, 0.01, HashStrategy::Murmur).is_err());
        assert!(BloomFilter::new(10, 0.0, HashStrategy::Murmur).is_err());
        assert!(BloomFilter::new(10, 1.0, HashStrategy::Murmur).is_err());
        assert!(BloomFilter::new(10, f64::NAN, HashStrategy::Murmur).is_err());
    }

    #[test]
    fn test_no_false_negatives() {
        for strategy in [HashStrategy::Xor, HashStrategy::Murmur] {
            let filter = BloomFilter::new(10_000, 0.001, strategy).unwrap();
            for i in 0..10_000 {
                filter.put(mixed(i));
            }
            assert_eq!(filter.entries(), 10_000);
            for i in 0..10_000 {
                assert!(filter.contains(mixed(i)), "{strategy:?} lost {i}");
            }
        }
    }

    #[test]
    fn test_segmented_no_false_negatives() {
        let filter = BloomFilter::segmented(5_000, 0.01, HashStrategy::Murmur, 4).unwrap();
        assert!(filter.regime().is_large());
        for i in 0..5_000 {
            filter.put(i * 7);
        }
        for i in 0..5_000 {
            assert!(filter.contains(i * 7));
        }
    }

    #[test]
    fn test_false_positive_rate() {
        let filter = BloomFilter::new(20_000, 0.01, HashStrategy::Murmur).unwrap();
        for i in 0..20_000 {
            filter.put(mixed(i));
        }
        let false_positives = (20_000..220_000).filter(|&i| filter.contains(mixed(i))).count();
        // 2,000 expected
        assert!(
            (1_500..2_600).contains(&false_positives),
            "false positives: {false_positives}"
        );
        assert!((filter.expected_fpp() - 0.01).abs() < 0.002);
    }

    #[test]
    fn test_ensure_capacity_reuses_allocation() {
        let mut filter = BloomFilter::new(10_000, 0.001, HashStrategy::Murmur).unwrap();
        let capacity = filter.bits.capacity();
        let seeds = filter.seeds.clone();
        filter.put(42);

        filter.ensure_capacity(5_000, 0.001).unwrap();
        assert_eq!(filter.bits.capacity(), capacity);
        assert!(filter.bit_size() < capacity);
        assert_eq!(filter.entries(), 0);
        assert!(!filter.contains(42));
        assert_eq!(&seeds[..filter.hash_count()], filter.seeds.as_slice());
    }

    #[test]
    fn test_ensure_capacity_grows() {
        let mut filter = BloomFilter::new(100, 0.01, HashStrategy::Murmur).unwrap();
        filter.ensure_capacity(100_000, 0.0001).unwrap();
        assert!(filter.bits.capacity() >= optimal_bits(100_000, 0.0001));
        assert_eq!(filter.hash_count(), 13);
        for i in 0..1_000 {
            filter.put(i);
        }
        assert!((0..1_000).all(|i| filter.contains(i)));
    }

    #[test]
    fn test_seeds_are_reproducible() {
        let a = BloomFilter::new(1_000, 0.01, HashStrategy::Murmur).unwrap();
        let b = BloomFilter::new(1_000, 0.01, HashStrategy::Murmur).unwrap();
        assert_eq!(a.seeds, b.seeds);
    }

    #[test]
    fn test_concurrent_puts() {
        let filter = BloomFilter::new(40_000, 0.001, HashStrategy::Murmur).unwrap();
        std::thread::scope(|s| {
            for t in 0..4u64 {
                let filter = &filter;
                s.spawn(move || {
                    for i in 0..10_000 {
                        filter.put(mixed(t * 10_000 + i));
                    }
                });
            }
        });
        assert_eq!(filter.entries(), 40_000);
        assert!((0..40_000).all(|i| filter.contains(mixed(i))));
    }

    #[test]
    fn test_roundtrip() {
        let filter = BloomFilter::new(1_000, 0.01, HashStrategy::Xor).unwrap();
        for i in 0..1_000 {
            filter.put(mixed(i));
        }
        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();
        let loaded = BloomFilter::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(loaded.strategy(), HashStrategy::Xor);
        assert_eq!(loaded.bit_size(), filter.bit_size());
        assert_eq!(loaded.entries(), 1_000);
        for i in 0..5_000 {
            assert_eq!(loaded.contains(mixed(i)), filter.contains(mixed(i)));
        }
    }

    /// Offset of the word count in a serialized filter
    fn words_offset(filter: &BloomFilter) -> usize {
        1 + 4 + 8 + 8 + 8 + 8 + 8 * filter.hash_count()
    }

    fn corrupt(buffer: &[u8]) -> bool {
        matches!(
            BloomFilter::read_from(&mut &buffer[..]),
            Err(crate::Error::LoadError(LoadError::Corrupt(_)))
        )
    }

    #[test]
    fn test_section_layout() {
        let filter = BloomFilter::new(1_000, 0.01, HashStrategy::Murmur).unwrap();
        filter.put(7);
        filter.put(11);
        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();

        let words = filter.bit_size().div_ceil(64);
        assert_eq!(buffer.len(), words_offset(&filter) + 8 + 8 * words as usize);
        assert_eq!(buffer[0], HashStrategy::Murmur.as_u8());
        assert_eq!(&buffer[1..5], &(filter.hash_count() as u32).to_le_bytes());
        assert_eq!(&buffer[5..13], &filter.bit_size().to_le_bytes());
        assert_eq!(&buffer[13..21], &1_000u64.to_le_bytes());
        assert_eq!(&buffer[21..29], &0.01f64.to_le_bytes());
        assert_eq!(&buffer[29..37], &2u64.to_le_bytes());
        assert_eq!(&buffer[37..45], &filter.seeds[0].to_le_bytes());
        let offset = words_offset(&filter);
        assert_eq!(&buffer[offset..offset + 8], &words.to_le_bytes());
        assert_eq!(&buffer[offset + 8..offset + 16], &filter.bits.word(0).to_le_bytes());
    }

    #[test]
    fn test_shrunk_filter_writes_addressed_words() {
        let mut filter = BloomFilter::new(10_000, 0.001, HashStrategy::Xor).unwrap();
        filter.ensure_capacity(100, 0.001).unwrap();
        filter.put(42);
        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();
        let loaded = BloomFilter::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(loaded.bits.num_words() as u64, filter.bit_size().div_ceil(64));
        assert!(loaded.contains(42));
    }

    #[test]
    fn test_read_rejects_oversized_word_count() {
        let filter = BloomFilter::new(1_000, 0.01, HashStrategy::Murmur).unwrap();
        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();
        let offset = words_offset(&filter);
        for words in [1u64 << 59, u64::MAX, 0] {
            let mut bad = buffer.clone();
            bad[offset..offset + 8].copy_from_slice(&words.to_le_bytes());
            assert!(corrupt(&bad), "{words} words accepted");
        }
    }

    #[test]
    fn test_read_huge_filter_fails_on_missing_words() {
        let filter = BloomFilter::new(1_000, 0.01, HashStrategy::Murmur).unwrap();
        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();
        let bit_size = u64::MAX - 63;
        buffer[5..13].copy_from_slice(&bit_size.to_le_bytes());
        let offset = words_offset(&filter);
        buffer[offset..offset + 8].copy_from_slice(&bit_size.div_ceil(64).to_le_bytes());
        let err = BloomFilter::read_from(&mut buffer.as_slice()).unwrap_err();
        assert!(
            matches!(&err, crate::Error::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_read_rejects_bad_sizing() {
        let filter = BloomFilter::new(1_000, 0.01, HashStrategy::Murmur).unwrap();
        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();

        let mut bad = buffer.clone();
        bad[1..5].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(corrupt(&bad));

        let mut bad = buffer.clone();
        bad[1..5].copy_from_slice(&0u32.to_le_bytes());
        assert!(corrupt(&bad));

        let mut bad = buffer.clone();
        bad[21..29].copy_from_slice(&f64::NAN.to_le_bytes());
        assert!(corrupt(&bad));

        let mut bad = buffer;
        bad[0] = 9;
        assert!(corrupt(&bad));
    }

    #[test]
    fn test_read_truncated() {
        let filter = BloomFilter::new(1_000, 0.01, HashStrategy::Murmur).unwrap();
        let mut buffer = Vec::new();
        filter.write_to(&mut buffer).unwrap();
        buffer.truncate(buffer.len() / 2);
        assert!(BloomFilter::read_from(&mut buffer.as_slice()).is_err());
    }
}
