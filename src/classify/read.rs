use std::io;
use std::path::Path;

use auto_impl::auto_impl;
use seq_io::fastq::{self, Record};

use crate::error::Result;

/// Quality byte written for reads that carry no qualities
pub const DEFAULT_QUALITY_SCORE: u8 = b'?';

/// A reusable read buffer handed from the producer to a consumer
///
/// Buffers are recycled through a pool, so their allocations are reused
/// across reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadEntry {
    pub descriptor: Vec<u8>,
    pub read: Vec<u8>,
    /// Empty when the source has no qualities
    pub quality: Vec<u8>,
    /// Position of the read in its source
    pub read_no: u64,
}
impl ReadEntry {
    /// Fills the buffer with a copy of one read
    pub fn fill(&mut self, descriptor: &[u8], read: &[u8], quality: Option<&[u8]>) {
        self.descriptor.clear();
        self.descriptor.extend_from_slice(descriptor);
        self.read.clear();
        self.read.extend_from_slice(read);
        self.quality.clear();
        if let Some(quality) = quality {
            self.quality.extend_from_slice(quality);
        }
    }

    /// Descriptor as text, lossily decoded
    #[must_use]
    pub fn descriptor_str(&self) -> String {
        String::from_utf8_lossy(&self.descriptor).into_owned()
    }
}

/// A stream of reads
#[auto_impl(&mut, Box)]
pub trait ReadSource {
    /// Fills `entry` with the next read
    ///
    /// Returns `Ok(false)` at the end of the stream.
    fn next_read(&mut self, entry: &mut ReadEntry) -> Result<bool>;
}

/// Reads FASTQ records with `seq_io`
pub struct FastqSource<R: io::Read> {
    reader: fastq::Reader<R>,
}
impl<R: io::Read> FastqSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: fastq::Reader::new(reader),
        }
    }
}
impl FastqSource<Box<dyn io::Read + Send>> {
    /// Opens a FASTQ file, transparently decompressing gzip, bzip2, xz or zstd
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (reader, format) = niffler::send::from_path(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), ?format, "opened read source");
        Ok(Self::new(reader))
    }
}
impl<R: io::Read> ReadSource for FastqSource<R> {
    fn next_read(&mut self, entry: &mut ReadEntry) -> Result<bool> {
        match self.reader.next() {
            Some(record) => {
                let record = record?;
                entry.fill(record.head(), record.seq(), Some(record.qual()));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// An in-memory read source
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    reads: Vec<(Vec<u8>, Vec<u8>, Option<Vec<u8>>)>,
    pos: usize,
}
impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a read without qualities
    #[must_use]
    pub fn with_read(mut self, descriptor: &str, read: &[u8]) -> Self {
        self.push(descriptor.as_bytes(), read, None);
        self
    }

    pub fn push(&mut self, descriptor: &[u8], read: &[u8], quality: Option<&[u8]>) {
        self.reads
            .push((descriptor.to_vec(), read.to_vec(), quality.map(<[u8]>::to_vec)));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}
impl ReadSource for MemorySource {
    fn next_read(&mut self, entry: &mut ReadEntry) -> Result<bool> {
        let Some((descriptor, read, quality)) = self.reads.get(self.pos) else {
            return Ok(false);
        };
        entry.fill(descriptor, read, quality.as_deref());
        self.pos += 1;
        Ok(true)
    }
}
