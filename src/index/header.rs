use std::io;

use bytemuck::{Pod, Zeroable};

use crate::{
    error::{LoadError, Result},
    segmented::Regime,
};

/// Magic number identifying a persisted k-mer index
pub const INDEX_MAGIC: &[u8; 8] = b"KMERTAXI";

/// Current version of the index format
pub const INDEX_VERSION: u32 = 1;

/// The body following the header is a zstd stream
pub(crate) const FLAG_COMPRESSED: u64 = 1 << 0;

/// The stored entries are sorted by k-mer
pub(crate) const FLAG_OPTIMIZED: u64 = 1 << 1;

/// Size of the header in bytes
pub const SIZE_HEADER: usize = std::mem::size_of::<IndexHeader>();

/// The header of a persisted k-mer index
///
/// This is stored identically in memory and on disk.
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct IndexHeader {
    magic: [u8; 8],

    /// Format version
    pub version: u32,

    /// K-mer length of every stored entry
    pub k: u32,

    /// Bit flags (compression, optimized)
    pub flags: u64,

    /// Number of stored entries
    pub entries: u64,

    /// Number of reserved entries
    pub capacity: u64,

    /// Number of interned values
    pub num_values: u64,

    /// Segment bits of the entry array, or 0 for the small regime
    pub segment_bits: u32,

    reserved: [u8; 12],
}
impl IndexHeader {
    #[must_use]
    pub fn new(
        k: usize,
        entries: usize,
        capacity: usize,
        num_values: usize,
        regime: Regime,
    ) -> Self {
        let segment_bits = match regime {
            Regime::Small => 0,
            Regime::Large { segment_bits } => segment_bits,
        };
        Self {
            magic: *INDEX_MAGIC,
            version: INDEX_VERSION,
            k: k as u32,
            flags: 0,
            entries: entries as u64,
            capacity: capacity as u64,
            num_values: num_values as u64,
            segment_bits,
            reserved: [0; 12],
        }
    }

    #[must_use]
    pub fn with_flag(mut self, flag: u64, set: bool) -> Self {
        if set {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
        self
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    #[must_use]
    pub fn is_optimized(&self) -> bool {
        self.flags & FLAG_OPTIMIZED != 0
    }

    /// Regime of the entry array when it was saved
    #[must_use]
    pub fn regime(&self) -> Regime {
        if self.segment_bits == 0 {
            Regime::Small
        } else {
            Regime::segmented(self.segment_bits)
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Parses and validates a header
    ///
    /// The magic is checked before the version so that foreign files are
    /// reported as such.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SIZE_HEADER {
            return Err(LoadError::Truncated(format!(
                "header needs {SIZE_HEADER} bytes, found {}",
                bytes.len()
            ))
            .into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_HEADER]);
        if header.magic != *INDEX_MAGIC {
            return Err(LoadError::InvalidMagic(header.magic).into());
        }
        if header.version != INDEX_VERSION {
            return Err(LoadError::VersionMismatch {
                expected: INDEX_VERSION,
                found: header.version,
            }
            .into());
        }
        if header.entries > header.capacity {
            return Err(LoadError::Corrupt(format!(
                "{} entries exceed capacity {}",
                header.entries, header.capacity
            ))
            .into());
        }
        if header.segment_bits >= usize::BITS {
            return Err(LoadError::Corrupt(format!("invalid segment bits {}", header.segment_bits)).into());
        }
        Ok(header)
    }

    pub fn write<W: io::Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.as_bytes())?;
        Ok(())
    }
}
