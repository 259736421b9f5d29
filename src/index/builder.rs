use std::time::Instant;

use super::{IndexOptions, KmerIndex};
use crate::{
    error::{Error, IndexError, Result},
    kmer::{Kmer, KmerScanner, MIN_RECOMMENDED_K},
    taxonomy::Taxonomy,
};

/// Conflicts above this count are resolved on all cores
const PARALLEL_CONFLICTS: usize = 10_000;

/// Populates a [`KmerIndex`] from reference sequences
///
/// A k-mer seen for two different taxa is first kept with the taxon that
/// claimed it first. Once all sequences are added, [`finish`](Self::finish)
/// reassigns it to the least common ancestor of every taxon that claimed it.
pub struct IndexBuilder<T: Taxonomy> {
    index: KmerIndex,
    taxonomy: T,
    conflicts: Vec<(Kmer, String)>,
    windows: u64,
    skipped_windows: u64,
}
impl<T: Taxonomy> IndexBuilder<T> {
    pub fn new(k: usize, capacity: usize, taxonomy: T) -> Result<Self> {
        Self::with_options(k, capacity, IndexOptions::default(), taxonomy)
    }

    pub fn with_options(
        k: usize,
        capacity: usize,
        options: IndexOptions,
        taxonomy: T,
    ) -> Result<Self> {
        if k < MIN_RECOMMENDED_K {
            tracing::warn!(
                k,
                min = MIN_RECOMMENDED_K,
                "short k-mers are rarely specific to a taxon"
            );
        }
        Ok(Self {
            index: KmerIndex::with_options(k, capacity, options)?,
            taxonomy,
            conflicts: Vec::new(),
            windows: 0,
            skipped_windows: 0,
        })
    }

    /// Adds one encoded k-mer of length `k`
    pub fn add_kmer(&mut self, kmer: Kmer, k: usize, tax_id: &str) -> Result<()> {
        if k != self.index.k() {
            return Err(IndexError::KmerLengthMismatch {
                expected: self.index.k(),
                found: k,
            }
            .into());
        }
        self.insert(kmer, tax_id)
    }

    fn insert(&mut self, kmer: Kmer, tax_id: &str) -> Result<()> {
        if !self.index.put(kmer, tax_id)? {
            self.conflicts.push((kmer, tax_id.to_string()));
        }
        Ok(())
    }

    /// Adds every valid forward k-mer of a reference sequence
    ///
    /// Returns the number of k-mers offered to the index.
    pub fn add_sequence(&mut self, seq: &[u8], tax_id: &str) -> Result<usize> {
        let scanner = KmerScanner::new(seq, self.index.k())?;
        let windows = scanner.num_windows();
        let mut added = 0;
        for (_, pair) in scanner.valid() {
            self.insert(pair.forward, tax_id)?;
            added += 1;
        }
        self.windows += windows as u64;
        self.skipped_windows += (windows - added) as u64;
        Ok(added)
    }

    /// Number of conflicting claims queued so far
    #[must_use]
    pub fn num_conflicts(&self) -> usize {
        self.conflicts.len()
    }

    #[must_use]
    pub fn index(&self) -> &KmerIndex {
        &self.index
    }

    /// Optimizes the index and merges conflicting claims into their LCA
    ///
    /// Claims whose taxa have no common ancestor in the taxonomy keep the
    /// value already stored.
    pub fn finish(self) -> Result<KmerIndex> {
        let Self {
            mut index,
            taxonomy,
            conflicts,
            windows,
            skipped_windows,
        } = self;

        let start = Instant::now();
        index.optimize();

        let threads = if conflicts.len() >= PARALLEL_CONFLICTS {
            num_cpus::get().max(1)
        } else {
            1
        };
        let chunk_size = conflicts.len().div_ceil(threads).max(1);
        let resolve = |chunk: &[(Kmer, String)]| -> Result<usize> {
            let mut merged = 0;
            for (kmer, tax_id) in chunk {
                let updated = index.update(*kmer, |old| {
                    taxonomy
                        .least_common_ancestor(old, tax_id)
                        .unwrap_or_else(|| old.to_string())
                })?;
                merged += usize::from(updated);
            }
            Ok(merged)
        };

        let merged = if threads == 1 {
            resolve(&conflicts)?
        } else {
            let resolve = &resolve;
            std::thread::scope(|s| {
                let handles: Vec<_> = conflicts
                    .chunks(chunk_size)
                    .map(|chunk| s.spawn(move || resolve(chunk)))
                    .collect();
                handles.into_iter().try_fold(0, |acc, handle| {
                    let merged = handle.join().map_err(|_| {
                        Error::from(Box::<dyn std::error::Error + Send + Sync>::from(
                            "conflict resolution thread panicked",
                        ))
                    })??;
                    Ok::<_, Error>(acc + merged)
                })
            })?
        };

        tracing::info!(
            entries = index.len(),
            values = index.values().len(),
            windows,
            skipped_windows,
            conflicts = conflicts.len(),
            merged,
            threads,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built k-mer index"
        );
        Ok(index)
    }
}
