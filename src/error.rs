use std::error::Error as StdError;

/// Custom Result type for kmertax operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the kmertax library, encompassing all possible error cases
/// that can occur while encoding, indexing, persisting and classifying.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors related to k-mer encoding
    #[error("Error encoding k-mer: {0}")]
    KmerError(#[from] KmerError),

    /// Errors related to the bloom filter prefilter
    #[error("Error configuring prefilter: {0}")]
    FilterError(#[from] FilterError),

    /// Errors raised while populating or querying a k-mer index
    #[error("Error processing index: {0}")]
    IndexError(#[from] IndexError),

    /// Errors raised while loading a persisted index
    #[error("Error loading index: {0}")]
    LoadError(#[from] LoadError),

    /// Errors raised by the classification pipeline
    #[error("Error classifying reads: {0}")]
    ClassifyError(#[from] ClassifyError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    /// FASTQ parsing errors
    #[error("Error parsing FASTQ: {0}")]
    FastqError(#[from] seq_io::fastq::Error),

    /// Errors from transparent input decompression
    #[error("Error opening compressed input: {0}")]
    NifflerError(#[from] niffler::Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}

/// Errors specific to encoding DNA windows into k-mers
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KmerError {
    /// A byte outside of `{A,C,G,T}` (case-insensitive) was found in the window
    ///
    /// `offset` counts from the start of the window in read order.
    #[error("Invalid nucleotide base {base} at window offset {offset}")]
    InvalidBase { offset: usize, base: u8 },

    /// The requested k cannot be represented in a 64-bit k-mer
    #[error("Invalid k-mer length {k} - expecting [1,{max}]")]
    InvalidK { k: usize, max: usize },
}

/// Errors raised while sizing the bloom filter
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// The expected insertions or false positive probability are out of range
    #[error("Invalid prefilter parameters: {expected_insertions} insertions at fpp {fpp} - expecting n > 0 and 0 < fpp < 1")]
    InvalidParameters { expected_insertions: u64, fpp: f64 },
}

/// Errors raised while populating or querying a [`KmerIndex`](crate::KmerIndex)
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// More entries were inserted than were reserved with `init_size`
    ///
    /// This always indicates a sizing error upstream.
    #[error("Index capacity ({capacity}) exceeded - reserve more entries before populating")]
    CapacityExceeded { capacity: usize },

    /// The value interner ran out of 16-bit indices
    #[error("Too many distinct values in index (maximum {max})")]
    InternerFull { max: usize },

    /// A k-mer of a different length was offered to the index
    #[error("K-mer length mismatch: index uses k={expected} but found k={found}")]
    KmerLengthMismatch { expected: usize, found: usize },
}

/// Errors raised while loading a persisted index
///
/// A failed load never leaves a partially populated index behind.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    /// The blob does not start with the index magic
    #[error("Invalid index magic: {0:?}")]
    InvalidMagic([u8; 8]),

    /// The blob was written by an incompatible format version
    #[error("Index format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// The blob ended before all sections were read
    #[error("Index is truncated: {0}")]
    Truncated(String),

    /// A section is internally inconsistent
    #[error("Index is corrupt: {0}")]
    Corrupt(String),
}

/// Errors raised by the producer/consumer classification pipeline
#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    /// A consumer thread panicked while classifying
    #[error("Consumer thread {0} panicked")]
    ConsumerPanicked(usize),

    /// The run was cancelled because another thread failed
    #[error("Classification aborted after a failure in another thread")]
    Aborted,

    /// The queue was closed before the producer finished
    #[error("Read queue closed unexpectedly")]
    QueueClosed,

    /// The ambiguity policy resolves through a taxonomy but none was given
    #[error("Ambiguity policy {0} requires a taxonomy")]
    MissingTaxonomy(&'static str),

    /// Writing an annotation or filtered read failed
    #[error("Failed to write output stream: {0}")]
    Output(std::io::Error),
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoKmertaxError {
    fn into_kmertax_error(self) -> Error;
}

impl<E> IntoKmertaxError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_kmertax_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}
