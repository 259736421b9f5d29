use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{bloom::fmix64, kmer::Kmer};

/// Number of independently locked shards
const SHARDS: usize = 64;

/// Counts how often each matched k-mer was seen during a run
///
/// Used to tell the first sighting of a k-mer for its taxon (a unique k-mer)
/// apart from repeats. The map is split into shards keyed by a hash of the
/// k-mer, each behind its own lock, so consumers rarely contend.
#[derive(Debug)]
pub struct KmerOccurrences {
    shards: Vec<Mutex<HashMap<Kmer, (u16, u32)>>>,
}
impl Default for KmerOccurrences {
    fn default() -> Self {
        Self::new()
    }
}
impl KmerOccurrences {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    #[inline]
    fn shard(&self, kmer: Kmer) -> &Mutex<HashMap<Kmer, (u16, u32)>> {
        &self.shards[fmix64(kmer) as usize % SHARDS]
    }

    /// Records one sighting of `kmer` for the taxon with value index `value`
    ///
    /// Returns the updated count, where `Some(1)` marks the first sighting.
    /// Returns `None` without counting when the k-mer was already claimed by a
    /// different taxon.
    pub fn increment(&self, kmer: Kmer, value: u16) -> Option<u32> {
        let mut shard = self.shard(kmer).lock();
        let (owner, count) = shard.entry(kmer).or_insert((value, 0));
        if *owner != value {
            return None;
        }
        *count += 1;
        Some(*count)
    }

    /// Number of times `kmer` was seen
    #[must_use]
    pub fn count(&self, kmer: Kmer) -> u32 {
        self.shard(kmer).lock().get(&kmer).map_or(0, |&(_, count)| count)
    }

    /// Number of distinct k-mers seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
