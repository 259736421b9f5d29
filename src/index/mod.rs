//! Sorted-array k-mer store
//!
//! A [`KmerIndex`] maps k-mers to taxon values. It is populated in bulk with
//! [`put`](KmerIndex::put) (and [`update`](KmerIndex::update) to merge
//! conflicting observations), sorted once with [`optimize`](KmerIndex::optimize)
//! and then queried concurrently through `&KmerIndex`.
//!
//! Each entry is one `{kmer, value}` record, so sorting moves both together.
//! Values are interned to 16-bit indices by a [`ValueInterner`]. Every lookup is
//! gated by a [`BloomFilter`]: a negative answer skips the search entirely.

mod builder;
mod header;
mod interner;
mod io;

pub use builder::IndexBuilder;
pub use header::{IndexHeader, INDEX_MAGIC, INDEX_VERSION};
pub use interner::{ValueInterner, ABSENT, MAX_VALUES};

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::{
    bloom::{BloomFilter, HashStrategy},
    error::{IndexError, Result},
    kmer::{kmer_mask, validate_k, Kmer},
    segmented::{BigArray, Regime},
};

/// Default false positive probability of the index prefilter
pub const DEFAULT_INDEX_FPP: f64 = 0.0001;

/// Number of striped locks guarding [`KmerIndex::update`]
const UPDATE_STRIPES: usize = 1024;

/// One `{kmer, value}` record
///
/// The value index is atomic so that [`KmerIndex::update`] can replace it
/// through a shared reference.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) kmer: Kmer,
    pub(crate) value: AtomicU16,
}
impl Entry {
    pub(crate) fn new(kmer: Kmer, value: u16) -> Self {
        Self {
            kmer,
            value: AtomicU16::new(value),
        }
    }

    fn empty() -> Self {
        Self::new(0, ABSENT)
    }

    #[inline]
    pub(crate) fn value(&self) -> u16 {
        self.value.load(Ordering::Acquire)
    }
}

/// Construction options of a [`KmerIndex`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexOptions {
    /// False positive probability of the prefilter
    pub fpp: f64,
    /// Hash strategy of the prefilter
    pub hash_strategy: HashStrategy,
    /// Forces the segmented regime with `1 << segment_bits` entries per segment
    pub segment_bits: Option<u32>,
}
impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            fpp: DEFAULT_INDEX_FPP,
            hash_strategy: HashStrategy::default(),
            segment_bits: None,
        }
    }
}
impl IndexOptions {
    #[must_use]
    pub fn fpp(mut self, fpp: f64) -> Self {
        self.fpp = fpp;
        self
    }

    #[must_use]
    pub fn hash_strategy(mut self, strategy: HashStrategy) -> Self {
        self.hash_strategy = strategy;
        self
    }

    #[must_use]
    pub fn segment_bits(mut self, bits: u32) -> Self {
        self.segment_bits = Some(bits);
        self
    }

    fn regime_for(&self, len: usize) -> Regime {
        self.segment_bits
            .map_or_else(|| Regime::for_len(len), Regime::segmented)
    }

    fn filter_for(&self, capacity: usize) -> Result<BloomFilter> {
        let n = capacity.max(1) as u64;
        match self.segment_bits {
            Some(bits) => BloomFilter::segmented(n, self.fpp, self.hash_strategy, bits),
            None => BloomFilter::new(n, self.fpp, self.hash_strategy),
        }
    }
}

/// A k-mer to taxon store backed by a sorted array
#[derive(Debug)]
pub struct KmerIndex {
    k: usize,
    options: IndexOptions,
    entries: BigArray<Entry>,
    len: usize,
    optimized: bool,
    filter: BloomFilter,
    values: RwLock<ValueInterner>,
    locks: Vec<Mutex<()>>,
}
impl KmerIndex {
    /// Creates an index for k-mers of length `k` reserving `capacity` entries
    pub fn new(k: usize, capacity: usize) -> Result<Self> {
        Self::with_options(k, capacity, IndexOptions::default())
    }

    /// Creates an index with explicit prefilter and regime options
    pub fn with_options(k: usize, capacity: usize, options: IndexOptions) -> Result<Self> {
        validate_k(k)?;
        let filter = options.filter_for(capacity)?;
        Ok(Self::from_parts(
            k,
            options,
            BigArray::with_regime(capacity, options.regime_for(capacity), Entry::empty),
            0,
            true,
            filter,
            ValueInterner::new(),
        ))
    }

    pub(crate) fn from_parts(
        k: usize,
        options: IndexOptions,
        entries: BigArray<Entry>,
        len: usize,
        optimized: bool,
        filter: BloomFilter,
        values: ValueInterner,
    ) -> Self {
        Self {
            k,
            options,
            entries,
            len,
            optimized,
            filter,
            values: RwLock::new(values),
            locks: (0..UPDATE_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Reserves storage for `capacity` entries and empties the index
    ///
    /// Existing storage is cleared and reused when it already covers `capacity`
    /// in the same regime; otherwise it is reallocated.
    pub fn init_size(&mut self, capacity: usize) -> Result<()> {
        let regime = self.options.regime_for(capacity);
        if capacity <= self.entries.len() && regime == self.entries.regime() {
            self.entries.fill_with(Entry::empty);
        } else {
            self.entries = BigArray::with_regime(capacity, regime, Entry::empty);
        }
        self.filter
            .ensure_capacity(capacity.max(1) as u64, self.options.fpp)?;
        self.len = 0;
        self.optimized = true;
        *self.values.get_mut() = ValueInterner::new();
        Ok(())
    }

    /// Inserts a k-mer with its value
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The entry was inserted, or the identical entry already exists
    /// * `Ok(false)` - The k-mer exists with a different value; nothing changed
    /// * `Err(IndexError::CapacityExceeded)` - The reserved capacity is used up
    pub fn put(&mut self, kmer: Kmer, value: &str) -> Result<bool> {
        debug_assert!(kmer <= kmer_mask(self.k), "k-mer wider than k={}", self.k);
        if self.filter.contains(kmer) {
            if let Some(pos) = self.position(kmer) {
                let existing = self.entries.get(pos).value();
                return Ok(self.values.get_mut().index_of(value) == Some(existing));
            }
        }
        if self.len >= self.entries.len() {
            return Err(IndexError::CapacityExceeded {
                capacity: self.entries.len(),
            }
            .into());
        }

        let idx = self.values.get_mut().intern(value)?;
        // appending in ascending order keeps the entries sorted
        if self.optimized && self.len > 0 && self.entries.get(self.len - 1).kmer > kmer {
            self.optimized = false;
        }
        self.entries.set(self.len, Entry::new(kmer, idx));
        self.len += 1;
        self.filter.put(kmer);
        Ok(true)
    }

    /// Replaces the value of an existing k-mer with `provider(old_value)`
    ///
    /// Returns `Ok(false)` when the k-mer is not in the index. Concurrent calls
    /// for the same k-mer are serialized by a lock striped on the entry position.
    pub fn update<F>(&self, kmer: Kmer, provider: F) -> Result<bool>
    where
        F: FnOnce(&str) -> String,
    {
        if !self.filter.contains(kmer) {
            return Ok(false);
        }
        let Some(pos) = self.position(kmer) else {
            return Ok(false);
        };

        let _guard = self.locks[pos % UPDATE_STRIPES].lock();
        let entry = self.entries.get(pos);
        let old = {
            let values = self.values.read();
            values.value(entry.value()).unwrap_or_default().to_string()
        };
        let new = provider(&old);
        if new != old {
            let idx = self.values.write().intern(&new)?;
            entry.value.store(idx, Ordering::Release);
        }
        Ok(true)
    }

    /// Sorts the entries by k-mer; a no-op on an optimized index
    pub fn optimize(&mut self) {
        if self.optimized {
            return;
        }
        let start = Instant::now();
        self.entries.sort_unstable_by_key(self.len, |e| e.kmer);
        self.optimized = true;
        tracing::debug!(
            entries = self.len,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "optimized k-mer index"
        );
    }

    /// Position of a k-mer among the stored entries
    fn position(&self, kmer: Kmer) -> Option<usize> {
        if self.optimized {
            self.entries
                .binary_search_by_key(self.len, &kmer, |e| e.kmer)
                .ok()
        } else {
            self.entries.iter().take(self.len).position(|e| e.kmer == kmer)
        }
    }

    /// Value index of a k-mer
    ///
    /// This is the hot path used during classification: the prefilter rejects
    /// most misses before the binary search.
    #[inline]
    #[must_use]
    pub fn lookup(&self, kmer: Kmer) -> Option<u16> {
        if !self.filter.contains(kmer) {
            return None;
        }
        self.position(kmer).map(|pos| self.entries.get(pos).value())
    }

    /// Value of a k-mer
    #[must_use]
    pub fn get(&self, kmer: Kmer) -> Option<String> {
        self.lookup(kmer).and_then(|idx| self.value(idx))
    }

    /// Value of an interned index
    #[must_use]
    pub fn value(&self, idx: u16) -> Option<String> {
        self.values.read().value(idx).map(str::to_string)
    }

    /// Read access to the value interner
    pub fn values(&self) -> RwLockReadGuard<'_, ValueInterner> {
        self.values.read()
    }

    /// Stored `(kmer, value index)` pairs in storage order
    pub fn iter(&self) -> impl Iterator<Item = (Kmer, u16)> + '_ {
        self.entries
            .iter()
            .take(self.len)
            .map(|e| (e.kmer, e.value()))
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of reserved entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    #[must_use]
    pub fn regime(&self) -> Regime {
        self.entries.regime()
    }

    #[must_use]
    pub fn options(&self) -> IndexOptions {
        self.options
    }

    #[must_use]
    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::{encode, Orientation};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::HashMap;

    fn kmer(s: &[u8]) -> Kmer {
        encode(s, Orientation::Forward).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let mut index = KmerIndex::new(4, 10).unwrap();
        assert!(index.put(kmer(b"TTTT"), "taxonB").unwrap());
        assert!(index.put(kmer(b"ACGT"), "taxonA").unwrap());
        assert_eq!(index.len(), 2);
        assert!(!index.is_optimized());

        // linear fallback before optimizing
        assert_eq!(index.get(kmer(b"ACGT")).as_deref(), Some("taxonA"));

        index.optimize();
        assert!(index.is_optimized());
        assert_eq!(index.get(kmer(b"ACGT")).as_deref(), Some("taxonA"));
        assert_eq!(index.get(kmer(b"TTTT")).as_deref(), Some("taxonB"));
        assert_eq!(index.get(kmer(b"AAAA")), None);
    }

    #[test]
    fn test_identical_put_is_idempotent() {
        let mut index = KmerIndex::new(4, 10).unwrap();
        assert!(index.put(kmer(b"ACGT"), "taxonA").unwrap());
        assert!(index.put(kmer(b"ACGT"), "taxonA").unwrap());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_conflicting_put_is_rejected() {
        let mut index = KmerIndex::new(4, 10).unwrap();
        assert!(index.put(kmer(b"ACGT"), "taxonA").unwrap());
        assert!(!index.put(kmer(b"ACGT"), "taxonB").unwrap());
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(kmer(b"ACGT")).as_deref(), Some("taxonA"));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut index = KmerIndex::new(4, 2).unwrap();
        index.put(kmer(b"AAAA"), "a").unwrap();
        index.put(kmer(b"CCCC"), "a").unwrap();
        let err = index.put(kmer(b"GGGG"), "a").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::IndexError(IndexError::CapacityExceeded { capacity: 2 })
        ));
        assert_eq!(index.len(), 2);
        // an existing entry still resolves at capacity
        assert!(index.put(kmer(b"AAAA"), "a").unwrap());
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let mut index = KmerIndex::new(4, 10).unwrap();
        for s in [b"TTTT", b"ACGT", b"GGGG", b"AAAA"] {
            index.put(kmer(s), "x").unwrap();
        }
        index.optimize();
        let first: Vec<_> = index.iter().collect();
        index.optimize();
        let second: Vec<_> = index.iter().collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_put_after_optimize_keeps_lookups() {
        let mut index = KmerIndex::new(4, 10).unwrap();
        index.put(kmer(b"CCCC"), "x").unwrap();
        index.optimize();
        // appending a larger k-mer keeps the order
        index.put(kmer(b"TTTT"), "y").unwrap();
        assert!(index.is_optimized());
        // a smaller one does not
        index.put(kmer(b"AAAA"), "z").unwrap();
        assert!(!index.is_optimized());
        assert_eq!(index.get(kmer(b"AAAA")).as_deref(), Some("z"));
        index.optimize();
        assert_eq!(index.get(kmer(b"TTTT")).as_deref(), Some("y"));
    }

    #[test]
    fn test_update() {
        let mut index = KmerIndex::new(4, 10).unwrap();
        index.put(kmer(b"ACGT"), "562").unwrap();
        index.optimize();
        assert!(index.update(kmer(b"ACGT"), |old| format!("{old}-merged")).unwrap());
        assert_eq!(index.get(kmer(b"ACGT")).as_deref(), Some("562-merged"));
        assert!(!index.update(kmer(b"AAAA"), |_| "never".to_string()).unwrap());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_concurrent_updates() {
        let mut index = KmerIndex::new(8, 1_000).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let mut kmers = Vec::new();
        while kmers.len() < 500 {
            let k = rng.random_range(0..(1u64 << 16));
            if index.put(k, "0").unwrap() && !kmers.contains(&k) {
                kmers.push(k);
            }
        }
        index.optimize();

        std::thread::scope(|s| {
            for _ in 0..4 {
                let index = &index;
                let kmers = &kmers;
                s.spawn(move || {
                    for &k in kmers {
                        index
                            .update(k, |old| (old.parse::<u32>().unwrap() + 1).to_string())
                            .unwrap();
                    }
                });
            }
        });
        for &k in &kmers {
            assert_eq!(index.get(k).as_deref(), Some("4"));
        }
    }

    #[test]
    fn test_init_size_reuses_storage() {
        let mut index = KmerIndex::new(4, 100).unwrap();
        index.put(kmer(b"ACGT"), "a").unwrap();
        index.init_size(50).unwrap();
        assert_eq!(index.capacity(), 100);
        assert!(index.is_empty());
        assert_eq!(index.get(kmer(b"ACGT")), None);
        assert!(index.values().is_empty());

        index.init_size(200).unwrap();
        assert_eq!(index.capacity(), 200);
    }

    #[test]
    fn test_matches_linear_reference_in_both_regimes() {
        for options in [IndexOptions::default(), IndexOptions::default().segment_bits(5)] {
            let mut rng = StdRng::seed_from_u64(17);
            let mut index = KmerIndex::with_options(12, 2_000, options).unwrap();
            let mut reference: HashMap<Kmer, String> = HashMap::new();
            for _ in 0..2_000 {
                let k = rng.random_range(0..kmer_mask(12));
                let value = rng.random_range(0..20u32).to_string();
                let inserted = index.put(k, &value).unwrap();
                match reference.get(&k) {
                    Some(existing) => assert_eq!(inserted, *existing == value),
                    None => {
                        assert!(inserted);
                        reference.insert(k, value);
                    }
                }
            }
            assert_eq!(index.len(), reference.len());
            index.optimize();
            for (k, v) in &reference {
                assert_eq!(index.get(*k).as_ref(), Some(v));
            }
            for _ in 0..2_000 {
                let k = rng.random_range(0..kmer_mask(12));
                assert_eq!(index.get(k).as_ref(), reference.get(&k));
            }
        }
    }

    #[test]
    fn test_segmented_regime() {
        let index = KmerIndex::with_options(4, 100, IndexOptions::default().segment_bits(4)).unwrap();
        assert!(index.regime().is_large());
        assert!(index.filter().regime().is_large());
    }

    #[test]
    fn test_invalid_k() {
        assert!(KmerIndex::new(0, 10).is_err());
        assert!(KmerIndex::new(33, 10).is_err());
    }
}
