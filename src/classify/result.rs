use std::collections::BTreeMap;

use super::TaxonHits;

/// Aggregated statistics of one taxon over a classification run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonStats {
    /// Reads with at least one k-mer of this taxon
    pub reads: u64,
    /// Reads assigned to this taxon
    pub classified_reads: u64,
    /// Matched k-mers
    pub kmers: u64,
    /// Distinct matched k-mers (only counted when unique accounting is enabled)
    pub unique_kmers: u64,
    /// Closed contigs
    pub contigs: u64,
    /// Longest contig in k-mers
    pub max_contig_len: u64,
    /// Descriptor of the read holding the longest contig
    pub max_contig_descriptor: Option<String>,
}
impl TaxonStats {
    /// Folds the hits of one read into the totals
    ///
    /// `descriptor` is only evaluated when the read holds a new longest contig.
    pub fn add_read(&mut self, hits: &TaxonHits, descriptor: impl FnOnce() -> String) {
        self.reads += 1;
        self.kmers += hits.kmers;
        self.unique_kmers += hits.unique_kmers;
        self.contigs += hits.contigs;
        if hits.max_contig_len > self.max_contig_len {
            self.max_contig_len = hits.max_contig_len;
            self.max_contig_descriptor = Some(descriptor());
        }
    }
}

/// Thresholds a taxon must reach to be reported downstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thresholds {
    pub min_reads: u64,
    pub min_kmers: u64,
    pub min_unique_kmers: u64,
}
impl Thresholds {
    #[must_use]
    pub fn min_reads(mut self, min_reads: u64) -> Self {
        self.min_reads = min_reads;
        self
    }

    #[must_use]
    pub fn min_kmers(mut self, min_kmers: u64) -> Self {
        self.min_kmers = min_kmers;
        self
    }

    #[must_use]
    pub fn min_unique_kmers(mut self, min_unique_kmers: u64) -> Self {
        self.min_unique_kmers = min_unique_kmers;
        self
    }

    #[must_use]
    pub fn accepts(&self, stats: &TaxonStats) -> bool {
        stats.reads >= self.min_reads
            && stats.kmers >= self.min_kmers
            && stats.unique_kmers >= self.min_unique_kmers
    }
}

/// Outcome of classifying a read stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    taxa: BTreeMap<String, TaxonStats>,
    /// Reads consumed from the source
    pub total_reads: u64,
    /// Valid k-mer windows scanned over all reads
    pub total_kmers: u64,
    /// Reads with at least one matching k-mer
    pub matched_reads: u64,
    /// Reads assigned to a taxon
    pub classified_reads: u64,
}
impl MatchResult {
    pub(crate) fn new(taxa: BTreeMap<String, TaxonStats>) -> Self {
        Self {
            taxa,
            ..Self::default()
        }
    }

    /// Statistics of one taxon
    #[must_use]
    pub fn taxon(&self, tax_id: &str) -> Option<&TaxonStats> {
        self.taxa.get(tax_id)
    }

    /// Taxa in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaxonStats)> {
        self.taxa.iter().map(|(id, stats)| (id.as_str(), stats))
    }

    /// Number of taxa with statistics
    #[must_use]
    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    /// Keeps only the taxa accepted by `thresholds`; totals are unchanged
    #[must_use]
    pub fn filter(&self, thresholds: &Thresholds) -> Self {
        Self {
            taxa: self
                .taxa
                .iter()
                .filter(|(_, stats)| thresholds.accepts(stats))
                .map(|(id, stats)| (id.clone(), stats.clone()))
                .collect(),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> MatchResult {
        let mut taxa = BTreeMap::new();
        taxa.insert(
            "562".to_string(),
            TaxonStats {
                reads: 10,
                kmers: 500,
                unique_kmers: 80,
                ..TaxonStats::default()
            },
        );
        taxa.insert(
            "9606".to_string(),
            TaxonStats {
                reads: 1,
                kmers: 3,
                unique_kmers: 3,
                ..TaxonStats::default()
            },
        );
        let mut result = MatchResult::new(taxa);
        result.total_reads = 20;
        result
    }

    #[test]
    fn test_taxon_lookup() {
        let result = result();
        assert_eq!(result.len(), 2);
        assert_eq!(result.taxon("562").map(|s| s.reads), Some(10));
        assert!(result.taxon("1").is_none());
    }

    #[test]
    fn test_filter() {
        let result = result();
        let filtered = result.filter(&Thresholds::default().min_reads(2).min_kmers(10));
        assert_eq!(filtered.len(), 1);
        assert!(filtered.taxon("562").is_some());
        assert_eq!(filtered.total_reads, 20);

        let all = result.filter(&Thresholds::default());
        assert_eq!(all, result);
    }

    #[test]
    fn test_add_read() {
        let hits = |contigs, max_contig_len| TaxonHits {
            value: 1,
            kmers: 4,
            unique_kmers: 1,
            contigs,
            max_contig_len,
        };
        let mut stats = TaxonStats::default();
        stats.add_read(&hits(1, 3), || "read1".to_string());
        stats.add_read(&hits(2, 2), || unreachable!("not a longer contig"));
        stats.add_read(&hits(1, 5), || "read3".to_string());
        assert_eq!(stats.reads, 3);
        assert_eq!(stats.kmers, 12);
        assert_eq!(stats.unique_kmers, 3);
        assert_eq!(stats.contigs, 4);
        assert_eq!(stats.max_contig_len, 5);
        assert_eq!(stats.max_contig_descriptor.as_deref(), Some("read3"));
    }
}
