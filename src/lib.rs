//! # kmertax
//!
//! Taxon-tagged k-mer indexing and high throughput read classification.
//!
//! ## Overview
//!
//! `kmertax` stores fixed-length DNA subsequences (k-mers), each tagged with a
//! taxon id, in a compact sorted array and classifies sequencing reads against
//! it from many threads at once.
//!
//! The crate is organized bottom-up:
//!
//! - [`kmer`]: 2-bit packing of k-mers in forward and reverse-complement
//!   orientation, plus the sliding [`KmerRing`] used while scanning reads.
//! - [`bloom`]: a bloom filter prefilter with two hash strategies that gates
//!   every index lookup.
//! - [`segmented`]: arrays that switch to fixed-size segments past the size
//!   of a single allocation.
//! - [`index`]: the [`KmerIndex`] itself, its value interner, the
//!   [`IndexBuilder`] that merges conflicting taxa into their common ancestor,
//!   and binary persistence.
//! - [`classify`]: the producer/consumer [`Matcher`] that aggregates per-taxon
//!   statistics into a [`MatchResult`] and optionally writes annotated and
//!   filtered read streams.
//!
//! ## Example
//!
//! ```
//! use kmertax::{ClassifyConfig, KmerIndex, Matcher, MemorySource, Orientation, encode};
//!
//! let mut index = KmerIndex::new(4, 16)?;
//! index.put(encode(b"ACGT", Orientation::Forward)?, "taxonA")?;
//! index.put(encode(b"TTTT", Orientation::Forward)?, "taxonB")?;
//! index.optimize();
//!
//! let matcher = Matcher::new(&index).with_config(ClassifyConfig::default().consumers(2));
//! let mut reads = MemorySource::new().with_read("read1", b"GGACGTGG");
//! let result = matcher.classify(&mut reads)?;
//!
//! assert_eq!(result.taxon("taxonA").map(|t| t.classified_reads), Some(1));
//! # Ok::<(), kmertax::Error>(())
//! ```
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events for index builds, persistence and
//! classification runs. Install a subscriber in the application to see them.

pub mod bloom;
pub mod classify;
pub mod error;
pub mod index;
pub mod kmer;
mod policy;
pub mod segmented;
pub mod taxonomy;

pub use bloom::{BloomFilter, HashStrategy};
pub use classify::{
    AnnotationFormat, ClassifyConfig, FastqSource, MatchResult, Matcher, MemorySource,
    ReadEntry, ReadOutputs, ReadSource, TaxonStats, Thresholds,
};
pub use error::{Error, IntoKmertaxError, Result};
pub use index::{IndexBuilder, IndexOptions, KmerIndex, ValueInterner};
pub use kmer::{decode, encode, reverse_complement, Kmer, KmerRing, KmerScanner, Orientation};
pub use policy::{AmbiguityPolicy, RNG_SEED};
pub use segmented::{BigArray, Regime};
pub use taxonomy::{TaxNode, TaxTree, Taxonomy};
