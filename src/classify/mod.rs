//! Concurrent read classification
//!
//! A [`Matcher`] classifies a stream of reads against a frozen [`KmerIndex`].
//! The calling thread reads from a [`ReadSource`] into pooled [`ReadEntry`]
//! buffers and hands them to consumer threads over a bounded queue (see
//! [`run_pipeline`]). Each consumer scans its read window by window, first
//! looking up the forward k-mer and then its reverse complement, and folds
//! the per-read hits into a shared [`StatsTrie`] once per read.
//!
//! Per taxon the run records how many reads and k-mers hit it, how many
//! contigs (maximal runs of consecutive windows of that taxon) were seen and
//! the longest of them. A read hitting several taxa is assigned according to
//! the configured [`AmbiguityPolicy`].
//!
//! Matched reads can additionally be written to an annotation stream and a
//! filtered FASTQ stream, see [`ReadOutputs`].

mod matcher;
mod occurrences;
mod output;
mod pipeline;
mod read;
mod result;
mod stats;

pub use matcher::{ReadHits, ReadMatcher, TaxonHits};
pub use occurrences::KmerOccurrences;
pub use output::{AnnotationFormat, ReadOutputs};
pub use pipeline::{run_pipeline, ReadProcessor};
pub use read::{FastqSource, MemorySource, ReadEntry, ReadSource, DEFAULT_QUALITY_SCORE};
pub use result::{MatchResult, TaxonStats, Thresholds};
pub use stats::StatsTrie;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::{
    error::{ClassifyError, Result},
    index::KmerIndex,
    policy::AmbiguityPolicy,
    taxonomy::Taxonomy,
};

/// Default number of reads buffered between the producer and the consumers
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Configuration of a classification run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyConfig {
    /// Number of consumer threads
    ///
    /// With `0` reads are classified on the calling thread. Output streams are
    /// written in completion order, which only matches input order when this
    /// is at most 1.
    pub consumers: usize,
    /// Capacity of the read queue
    pub queue_capacity: usize,
    /// Track distinct k-mers per taxon
    pub count_unique_kmers: bool,
    /// Assignment of reads hitting several taxa
    pub ambiguity: AmbiguityPolicy,
    /// Layout of the annotation stream
    pub annotation_format: AnnotationFormat,
}
impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            consumers: num_cpus::get(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            count_unique_kmers: false,
            ambiguity: AmbiguityPolicy::default(),
            annotation_format: AnnotationFormat::default(),
        }
    }
}
impl ClassifyConfig {
    #[must_use]
    pub fn consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers;
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    #[must_use]
    pub fn count_unique_kmers(mut self, count_unique_kmers: bool) -> Self {
        self.count_unique_kmers = count_unique_kmers;
        self
    }

    #[must_use]
    pub fn ambiguity(mut self, ambiguity: AmbiguityPolicy) -> Self {
        self.ambiguity = ambiguity;
        self
    }

    #[must_use]
    pub fn annotation_format(mut self, annotation_format: AnnotationFormat) -> Self {
        self.annotation_format = annotation_format;
        self
    }
}

/// State shared by every consumer of one run
struct MatchContext<'a, 'w> {
    index: &'a KmerIndex,
    taxonomy: Option<&'a dyn Taxonomy>,
    config: ClassifyConfig,
    stats: StatsTrie,
    occurrences: Option<KmerOccurrences>,
    outputs: Option<Mutex<ReadOutputs<'w>>>,
    annotate: bool,
    filter: bool,
    total_kmers: AtomicU64,
    matched_reads: AtomicU64,
    classified_reads: AtomicU64,
}
impl<'a, 'w> MatchContext<'a, 'w> {
    fn new(matcher: &Matcher<'a>, outputs: ReadOutputs<'w>) -> Self {
        let annotate = outputs.has_annotations();
        let filter = outputs.has_filtered();
        Self {
            index: matcher.index,
            taxonomy: matcher.taxonomy,
            config: matcher.config,
            stats: StatsTrie::new(),
            occurrences: matcher.config.count_unique_kmers.then(KmerOccurrences::new),
            outputs: (annotate || filter).then(|| Mutex::new(outputs)),
            annotate,
            filter,
            total_kmers: AtomicU64::new(0),
            matched_reads: AtomicU64::new(0),
            classified_reads: AtomicU64::new(0),
        }
    }

    fn into_result(self, total_reads: u64) -> MatchResult {
        let mut result = MatchResult::new(self.stats.into_map());
        result.total_reads = total_reads;
        result.total_kmers = self.total_kmers.into_inner();
        result.matched_reads = self.matched_reads.into_inner();
        result.classified_reads = self.classified_reads.into_inner();
        result
    }
}

/// Per-consumer state: reusable scan and output buffers
#[derive(Clone)]
struct ClassifyProcessor<'c, 'a, 'w> {
    ctx: &'c MatchContext<'a, 'w>,
    matcher: ReadMatcher,
    hits: ReadHits,
    annotation: Vec<u8>,
    record: Vec<u8>,
}
impl<'c, 'a, 'w> ClassifyProcessor<'c, 'a, 'w> {
    fn new(ctx: &'c MatchContext<'a, 'w>) -> Result<Self> {
        Ok(Self {
            ctx,
            matcher: ReadMatcher::new(ctx.index.k())?,
            hits: ReadHits::default(),
            annotation: Vec::new(),
            record: Vec::new(),
        })
    }
}
impl ReadProcessor for ClassifyProcessor<'_, '_, '_> {
    fn process_read(&mut self, entry: &ReadEntry) -> Result<()> {
        let ctx = self.ctx;
        self.matcher
            .scan(ctx.index, &entry.read, ctx.occurrences.as_ref(), &mut self.hits);
        ctx.total_kmers
            .fetch_add(self.hits.windows(), Ordering::Relaxed);
        if !self.hits.is_matched() {
            return Ok(());
        }
        ctx.matched_reads.fetch_add(1, Ordering::Relaxed);

        let values = ctx.index.values();
        let mut taxa = Vec::with_capacity(self.hits.taxa().len());
        for hits in self.hits.taxa() {
            let Some(taxon) = values.value(hits.value) else {
                continue;
            };
            ctx.stats
                .update(taxon, |stats| stats.add_read(hits, || entry.descriptor_str()));
            taxa.push(taxon);
        }

        let assigned = ctx.config.ambiguity.resolve(&taxa, ctx.taxonomy);
        if let Some(taxon) = assigned.as_deref() {
            ctx.stats.update(taxon, |stats| stats.classified_reads += 1);
            ctx.classified_reads.fetch_add(1, Ordering::Relaxed);
        }

        let Some(outputs) = ctx.outputs.as_ref() else {
            return Ok(());
        };
        self.annotation.clear();
        self.record.clear();
        if ctx.annotate {
            output::write_annotation(
                &mut self.annotation,
                ctx.config.annotation_format,
                entry,
                assigned.as_deref(),
                self.hits.runs(),
                &values,
            );
        }
        drop(values);
        if ctx.filter {
            output::write_fastq(&mut self.record, entry);
        }
        outputs
            .lock()
            .write(&self.annotation, &self.record)
            .map_err(|e| ClassifyError::Output(e).into())
    }
}

/// Classifies reads against a [`KmerIndex`]
pub struct Matcher<'a> {
    index: &'a KmerIndex,
    taxonomy: Option<&'a dyn Taxonomy>,
    config: ClassifyConfig,
}
impl<'a> Matcher<'a> {
    #[must_use]
    pub fn new(index: &'a KmerIndex) -> Self {
        Self {
            index,
            taxonomy: None,
            config: ClassifyConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ClassifyConfig) -> Self {
        self.config = config;
        self
    }

    /// Taxonomy used by [`AmbiguityPolicy::LowestCommonAncestor`]
    #[must_use]
    pub fn with_taxonomy(mut self, taxonomy: &'a dyn Taxonomy) -> Self {
        self.taxonomy = Some(taxonomy);
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClassifyConfig {
        &self.config
    }

    /// Classifies every read of `source`
    pub fn classify<S: ReadSource + ?Sized>(&self, source: &mut S) -> Result<MatchResult> {
        self.classify_with_outputs(source, ReadOutputs::new())
    }

    /// Classifies every read of `source`, writing matched reads to `outputs`
    ///
    /// Nothing is returned if any thread fails; the output streams may then
    /// hold a partial run.
    pub fn classify_with_outputs<S: ReadSource + ?Sized>(
        &self,
        source: &mut S,
        outputs: ReadOutputs<'_>,
    ) -> Result<MatchResult> {
        if self.config.ambiguity.needs_taxonomy() && self.taxonomy.is_none() {
            return Err(ClassifyError::MissingTaxonomy("LowestCommonAncestor").into());
        }
        if !self.index.is_optimized() {
            tracing::warn!("classifying against an unoptimized index falls back to linear scans");
        }

        let start = Instant::now();
        tracing::info!(
            k = self.index.k(),
            entries = self.index.len(),
            consumers = self.config.consumers,
            queue_capacity = self.config.queue_capacity,
            "starting classification"
        );

        let ctx = MatchContext::new(self, outputs);
        let processor = ClassifyProcessor::new(&ctx)?;
        let total_reads = run_pipeline(
            source,
            processor,
            self.config.consumers,
            self.config.queue_capacity,
        )?;
        if let Some(outputs) = ctx.outputs.as_ref() {
            outputs.lock().flush().map_err(ClassifyError::Output)?;
        }

        let result = ctx.into_result(total_reads);
        tracing::info!(
            total_reads = result.total_reads,
            matched_reads = result.matched_reads,
            classified_reads = result.classified_reads,
            taxa = result.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "finished classification"
        );
        Ok(result)
    }
}
