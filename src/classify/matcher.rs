use super::KmerOccurrences;
use crate::{
    error::Result,
    index::{KmerIndex, ABSENT},
    kmer::{Kmer, KmerRing},
};

/// Hits of one taxon within a single read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaxonHits {
    /// Value index of the taxon in the [`KmerIndex`]
    pub value: u16,
    pub kmers: u64,
    pub unique_kmers: u64,
    pub contigs: u64,
    pub max_contig_len: u64,
}

/// Everything one read contributes to the run statistics
///
/// Built by [`ReadMatcher::scan`] and folded into the shared statistics once
/// per read.
#[derive(Debug, Clone, Default)]
pub struct ReadHits {
    /// Distinct taxa in order of first hit
    taxa: Vec<TaxonHits>,
    /// Consecutive windows sharing a label; [`ABSENT`] marks unmatched windows
    runs: Vec<(u16, u32)>,
    /// Valid windows scanned
    windows: u64,
}
impl ReadHits {
    pub fn clear(&mut self) {
        self.taxa.clear();
        self.runs.clear();
        self.windows = 0;
    }

    #[must_use]
    pub fn taxa(&self) -> &[TaxonHits] {
        &self.taxa
    }

    #[must_use]
    pub fn runs(&self) -> &[(u16, u32)] {
        &self.runs
    }

    #[must_use]
    pub fn windows(&self) -> u64 {
        self.windows
    }

    /// Whether any k-mer of the read matched
    #[must_use]
    pub fn is_matched(&self) -> bool {
        !self.taxa.is_empty()
    }

    fn taxon_mut(&mut self, value: u16) -> &mut TaxonHits {
        let pos = match self.taxa.iter().position(|t| t.value == value) {
            Some(pos) => pos,
            None => {
                self.taxa.push(TaxonHits {
                    value,
                    ..TaxonHits::default()
                });
                self.taxa.len() - 1
            }
        };
        &mut self.taxa[pos]
    }

    fn push_label(&mut self, label: u16) {
        match self.runs.last_mut() {
            Some((last, run)) if *last == label => *run += 1,
            _ => self.runs.push((label, 1)),
        }
    }

    fn close_contig(&mut self, contig: Option<(u16, u64)>) {
        if let Some((value, len)) = contig {
            let taxon = self.taxon_mut(value);
            taxon.contigs += 1;
            taxon.max_contig_len = taxon.max_contig_len.max(len);
        }
    }
}

/// Scans reads against a [`KmerIndex`], one per consumer thread
#[derive(Debug, Clone)]
pub struct ReadMatcher {
    ring: KmerRing,
}
impl ReadMatcher {
    pub fn new(k: usize) -> Result<Self> {
        Ok(Self {
            ring: KmerRing::new(k)?,
        })
    }

    /// Looks up the forward k-mer of the window, then its reverse complement
    #[inline]
    fn lookup(&self, index: &KmerIndex) -> Option<(Kmer, u16)> {
        let pair = self.ring.pair()?;
        index
            .lookup(pair.forward)
            .map(|value| (pair.forward, value))
            .or_else(|| index.lookup(pair.reverse).map(|value| (pair.reverse, value)))
    }

    /// Classifies every window of `read` into `hits`
    ///
    /// A contig is the maximal run of consecutive windows resolving to the
    /// same taxon. It is closed by a window of another taxon, by an unmatched
    /// or invalid window, and at the end of the read.
    pub fn scan(
        &mut self,
        index: &KmerIndex,
        read: &[u8],
        occurrences: Option<&KmerOccurrences>,
        hits: &mut ReadHits,
    ) {
        hits.clear();
        self.ring.reset();
        let k = self.ring.k();

        let mut contig: Option<(u16, u64)> = None;
        for (i, &base) in read.iter().enumerate() {
            if !self.ring.push(base) && i + 1 < k {
                continue;
            }
            if self.ring.is_valid() {
                hits.windows += 1;
            }

            let Some((kmer, value)) = self.lookup(index) else {
                hits.push_label(ABSENT);
                hits.close_contig(contig.take());
                continue;
            };
            hits.push_label(value);

            let taxon = hits.taxon_mut(value);
            taxon.kmers += 1;
            if let Some(occurrences) = occurrences {
                match occurrences.increment(kmer, value) {
                    Some(1) => taxon.unique_kmers += 1,
                    Some(_) => {}
                    None => tracing::debug!(kmer, value, "k-mer claimed by a second taxon"),
                }
            }

            contig = match contig {
                Some((current, len)) if current == value => Some((current, len + 1)),
                previous => {
                    hits.close_contig(previous);
                    Some((value, 1))
                }
            };
        }
        hits.close_contig(contig);
    }
}
