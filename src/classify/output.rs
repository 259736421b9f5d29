use std::io::{self, Write};

use super::{ReadEntry, DEFAULT_QUALITY_SCORE};
use crate::index::ValueInterner;

/// Layout of the per-read annotation stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnnotationFormat {
    /// `<taxon>:<run>[ <taxon>:<run>]*` (default)
    ///
    /// Unmatched runs are written with taxon `0`.
    #[default]
    Runs,

    /// Kraken-style `C|U \t <descriptor> \t <assigned|0> \t <length> \t <runs>`
    Kraken,
}

/// Optional byte streams written while classifying
///
/// Both streams receive one record per matched read and share a single lock,
/// so a read's annotation and its filtered record are written together.
#[derive(Default)]
pub struct ReadOutputs<'w> {
    annotations: Option<Box<dyn Write + Send + 'w>>,
    filtered: Option<Box<dyn Write + Send + 'w>>,
}
impl<'w> ReadOutputs<'w> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one annotation line per matched read
    #[must_use]
    pub fn annotations<W: Write + Send + 'w>(mut self, writer: W) -> Self {
        self.annotations = Some(Box::new(writer));
        self
    }

    /// Writes every matched read as a 4-line FASTQ record
    #[must_use]
    pub fn filtered<W: Write + Send + 'w>(mut self, writer: W) -> Self {
        self.filtered = Some(Box::new(writer));
        self
    }

    #[must_use]
    pub fn has_annotations(&self) -> bool {
        self.annotations.is_some()
    }

    #[must_use]
    pub fn has_filtered(&self) -> bool {
        self.filtered.is_some()
    }

    pub(crate) fn write(&mut self, annotation: &[u8], record: &[u8]) -> io::Result<()> {
        if let Some(writer) = self.annotations.as_mut() {
            writer.write_all(annotation)?;
        }
        if let Some(writer) = self.filtered.as_mut() {
            writer.write_all(record)?;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = self.annotations.as_mut() {
            writer.flush()?;
        }
        if let Some(writer) = self.filtered.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Appends `<taxon>:<run>` items separated by spaces
pub(crate) fn write_runs(buf: &mut Vec<u8>, runs: &[(u16, u32)], values: &ValueInterner) {
    let mut ibuf = itoa::Buffer::new();
    for (i, &(value, run)) in runs.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        match values.value(value) {
            Some(taxon) => buf.extend_from_slice(taxon.as_bytes()),
            None => buf.push(b'0'),
        }
        buf.push(b':');
        buf.extend_from_slice(ibuf.format(run).as_bytes());
    }
}

/// Appends the annotation line of one read
pub(crate) fn write_annotation(
    buf: &mut Vec<u8>,
    format: AnnotationFormat,
    entry: &ReadEntry,
    assigned: Option<&str>,
    runs: &[(u16, u32)],
    values: &ValueInterner,
) {
    if format == AnnotationFormat::Kraken {
        buf.push(if assigned.is_some() { b'C' } else { b'U' });
        buf.push(b'\t');
        buf.extend_from_slice(&entry.descriptor);
        buf.push(b'\t');
        buf.extend_from_slice(assigned.unwrap_or("0").as_bytes());
        buf.push(b'\t');
        buf.extend_from_slice(itoa::Buffer::new().format(entry.read.len()).as_bytes());
        buf.push(b'\t');
    }
    write_runs(buf, runs, values);
    buf.push(b'\n');
}

/// Appends a 4-line FASTQ record, filling missing qualities
pub(crate) fn write_fastq(buf: &mut Vec<u8>, entry: &ReadEntry) {
    buf.push(b'@');
    buf.extend_from_slice(&entry.descriptor);
    buf.push(b'\n');
    buf.extend_from_slice(&entry.read);
    buf.extend_from_slice(b"\n+\n");
    if entry.quality.len() == entry.read.len() {
        buf.extend_from_slice(&entry.quality);
    } else {
        buf.resize(buf.len() + entry.read.len(), DEFAULT_QUALITY_SCORE);
    }
    buf.push(b'\n');
}
