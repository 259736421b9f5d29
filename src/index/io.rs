use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use zstd::stream::{Decoder, Encoder};

use super::{
    header::{FLAG_COMPRESSED, FLAG_OPTIMIZED, SIZE_HEADER},
    Entry, IndexHeader, IndexOptions, KmerIndex, ValueInterner, ABSENT, MAX_VALUES,
};
use crate::{
    bloom::BloomFilter,
    error::{Error, LoadError, Result},
    kmer::{kmer_mask, validate_k},
    segmented::{BigArray, Regime},
};

/// Reports an unexpected end of input in `section` as a truncated index
fn eof(err: impl Into<Error>, section: &str) -> Error {
    match err.into() {
        Error::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            LoadError::Truncated(format!("unexpected end of {section}")).into()
        }
        other => other,
    }
}

impl KmerIndex {
    /// Writes the index with an uncompressed body
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.write_with(writer, None)
    }

    /// Writes the index with a zstd-compressed body
    pub fn write_compressed_to<W: Write>(&self, writer: &mut W, level: i32) -> Result<()> {
        self.write_with(writer, Some(level))
    }

    fn write_with<W: Write>(&self, writer: &mut W, level: Option<i32>) -> Result<()> {
        let values = self.values.read();
        IndexHeader::new(self.k, self.len, self.capacity(), values.len(), self.regime())
            .with_flag(FLAG_COMPRESSED, level.is_some())
            .with_flag(FLAG_OPTIMIZED, self.optimized)
            .write(writer)?;
        match level {
            Some(level) => {
                let mut encoder = Encoder::new(&mut *writer, level)?;
                self.write_body(&mut encoder, &values)?;
                encoder.finish()?;
            }
            None => self.write_body(writer, &values)?,
        }
        Ok(())
    }

    fn write_body<W: Write>(&self, writer: &mut W, values: &ValueInterner) -> Result<()> {
        self.filter.write_to(writer)?;
        for entry in self.entries.iter().take(self.len) {
            writer.write_u64::<LittleEndian>(entry.kmer)?;
            writer.write_u16::<LittleEndian>(entry.value())?;
        }
        values.write_to(writer)
    }

    /// Saves the index to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.save_with(path.as_ref(), None)
    }

    /// Saves the index to a file with a zstd-compressed body
    pub fn save_compressed<P: AsRef<Path>>(&self, path: P, level: i32) -> Result<()> {
        self.save_with(path.as_ref(), Some(level))
    }

    fn save_with(&self, path: &Path, level: Option<i32>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_with(&mut writer, level)?;
        writer.flush()?;
        tracing::info!(
            path = %path.display(),
            entries = self.len,
            compressed = level.is_some(),
            "saved k-mer index"
        );
        Ok(())
    }

    /// Reads an index written by [`write_to`](Self::write_to) or
    /// [`write_compressed_to`](Self::write_compressed_to)
    ///
    /// Nothing is returned unless every section parsed and validated.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; SIZE_HEADER];
        reader
            .read_exact(&mut buf)
            .map_err(|e| eof(e, "header"))?;
        let header = IndexHeader::from_bytes(&buf)?;
        if header.is_compressed() {
            let mut decoder = Decoder::new(reader)?;
            Self::read_body(&header, &mut decoder)
        } else {
            Self::read_body(&header, reader)
        }
    }

    fn read_body<R: Read>(header: &IndexHeader, reader: &mut R) -> Result<Self> {
        let k = header.k as usize;
        validate_k(k).map_err(|e| LoadError::Corrupt(e.to_string()))?;
        let len = header.entries as usize;
        let num_values = header.num_values as usize;
        if num_values > MAX_VALUES {
            return Err(LoadError::Corrupt(format!("{num_values} values exceed {MAX_VALUES}")).into());
        }

        let filter = BloomFilter::read_from(reader).map_err(|e| eof(e, "prefilter"))?;

        // reserved slots are not stored, so the capacity cannot be checked
        // against the payload; only a fallible allocation guards it
        let mask = kmer_mask(k);
        let mut entries = usize::try_from(header.capacity)
            .ok()
            .and_then(|capacity| {
                BigArray::try_with_regime(capacity, header.regime(), Entry::empty).ok()
            })
            .ok_or_else(|| {
                LoadError::Corrupt(format!(
                    "capacity of {} entries cannot be allocated",
                    header.capacity
                ))
            })?;
        let mut previous = None;
        for i in 0..len {
            let kmer = reader
                .read_u64::<LittleEndian>()
                .map_err(|e| eof(e, "entries"))?;
            let value = reader
                .read_u16::<LittleEndian>()
                .map_err(|e| eof(e, "entries"))?;
            if kmer > mask {
                return Err(LoadError::Corrupt(format!("entry {i} is wider than k={k}")).into());
            }
            if value == ABSENT || usize::from(value) > num_values {
                return Err(LoadError::Corrupt(format!("entry {i} has unknown value {value}")).into());
            }
            if header.is_optimized() && previous.is_some_and(|p| p >= kmer) {
                return Err(LoadError::Corrupt(format!("entry {i} is out of order")).into());
            }
            previous = Some(kmer);
            entries.set(i, Entry::new(kmer, value));
        }

        let values = ValueInterner::read_from(reader, num_values).map_err(|e| eof(e, "values"))?;

        let options = IndexOptions {
            fpp: filter.target_fpp(),
            hash_strategy: filter.strategy(),
            segment_bits: match header.regime() {
                Regime::Small => None,
                Regime::Large { segment_bits } => Some(segment_bits),
            },
        };
        tracing::debug!(
            k,
            entries = len,
            values = num_values,
            compressed = header.is_compressed(),
            "loaded k-mer index"
        );
        Ok(Self::from_parts(
            k,
            options,
            entries,
            len,
            header.is_optimized(),
            filter,
            values,
        ))
    }

    /// Loads an index from a file through a buffered reader
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    /// Loads an index from a memory-mapped file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file) }?;
        Self::read_from(&mut &map[..])
    }
}
