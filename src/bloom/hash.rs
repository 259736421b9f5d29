/// Hash applied to a k-mer and one seed per bloom hash function
///
/// Both strategies share the same interface, so the choice is a configuration
/// decision made when the filter is created and stored with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashStrategy {
    /// `kmer ^ seed`
    ///
    /// Reversible and nearly free, but bit positions of different hash
    /// functions stay correlated, so the false positive rate is only near the
    /// configured target for well-mixed k-mers.
    Xor,

    /// Murmur3 64-bit finalizer over `kmer ^ seed` (default)
    ///
    /// A full multiply-xor-shift avalanche: every input bit affects every
    /// output bit.
    #[default]
    Murmur,
}
impl HashStrategy {
    /// Hashes a k-mer with one seed
    #[inline]
    #[must_use]
    pub fn hash(self, kmer: u64, seed: u64) -> u64 {
        match self {
            Self::Xor => kmer ^ seed,
            Self::Murmur => fmix64(kmer ^ seed),
        }
    }

    /// On-disk tag
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Xor => 0,
            Self::Murmur => 1,
        }
    }

    /// Parses an on-disk tag
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Xor),
            1 => Some(Self::Murmur),
            _ => None,
        }
    }
}

/// Murmur3 64-bit finalizer
#[inline]
#[must_use]
pub fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}
