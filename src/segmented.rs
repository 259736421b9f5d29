//! Arrays addressed past a single allocation
//!
//! [`BigArray`] stores its elements either in one `Vec` (the small regime) or in
//! fixed-size segments (the large regime). A logical index `i` in the large
//! regime resolves to `(i >> segment_bits, i & segment_mask)`.
//!
//! Both regimes expose the same get/set/swap/binary-search/sort surface, so
//! callers never branch on the regime. The regime is picked once when the
//! array is allocated and only changes by allocating a new array.

use std::cmp::Ordering;
use std::collections::TryReserveError;

/// Segment size used when the large regime is chosen automatically
pub const DEFAULT_SEGMENT_BITS: u32 = 27;

/// Largest length served by a single allocation
pub const SMALL_REGIME_LIMIT: usize = i32::MAX as usize;

/// Ranges at or below this size are insertion sorted
const INSERTION_THRESHOLD: usize = 16;

fn try_filled<T>(len: usize, fill: &mut impl FnMut() -> T) -> Result<Vec<T>, TryReserveError> {
    let mut items = Vec::new();
    items.try_reserve_exact(len)?;
    items.extend((0..len).map(|_| fill()));
    Ok(items)
}

/// Storage layout of a [`BigArray`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    /// A single contiguous allocation
    Small,
    /// Segments of `1 << segment_bits` elements
    Large { segment_bits: u32 },
}
impl Regime {
    /// Picks the regime for an array of `len` elements
    #[must_use]
    pub fn for_len(len: usize) -> Self {
        if len > SMALL_REGIME_LIMIT {
            Self::Large {
                segment_bits: DEFAULT_SEGMENT_BITS,
            }
        } else {
            Self::Small
        }
    }

    /// Forces the large regime with the given segment size
    #[must_use]
    pub fn segmented(segment_bits: u32) -> Self {
        Self::Large { segment_bits }
    }

    #[must_use]
    pub fn is_large(&self) -> bool {
        matches!(self, Self::Large { .. })
    }
}

#[derive(Debug)]
enum Storage<T> {
    Small(Vec<T>),
    Large {
        segments: Vec<Vec<T>>,
        bits: u32,
        mask: usize,
    },
}

/// A fixed-length array in either the small or the large regime
#[derive(Debug)]
pub struct BigArray<T> {
    storage: Storage<T>,
    len: usize,
}
impl<T> BigArray<T> {
    /// Allocates `len` elements in the regime chosen by [`Regime::for_len`]
    pub fn new(len: usize, fill: impl FnMut() -> T) -> Self {
        Self::with_regime(len, Regime::for_len(len), fill)
    }

    /// Allocates `len` elements in an explicit regime
    pub fn with_regime(len: usize, regime: Regime, mut fill: impl FnMut() -> T) -> Self {
        let storage = match regime {
            Regime::Small => Storage::Small((0..len).map(|_| fill()).collect()),
            Regime::Large { segment_bits } => {
                let segment_size = 1usize << segment_bits;
                let mut segments = Vec::with_capacity(len.div_ceil(segment_size));
                let mut remaining = len;
                while remaining > 0 {
                    let size = remaining.min(segment_size);
                    segments.push((0..size).map(|_| fill()).collect());
                    remaining -= size;
                }
                Storage::Large {
                    segments,
                    bits: segment_bits,
                    mask: segment_size - 1,
                }
            }
        };
        Self { storage, len }
    }

    /// Allocates `len` elements in an explicit regime, reporting allocation
    /// failure instead of aborting
    ///
    /// Used when `len` comes from untrusted input such as a persisted index.
    pub fn try_with_regime(
        len: usize,
        regime: Regime,
        mut fill: impl FnMut() -> T,
    ) -> Result<Self, TryReserveError> {
        let storage = match regime {
            Regime::Small => Storage::Small(try_filled(len, &mut fill)?),
            Regime::Large { segment_bits } => {
                let segment_size = 1usize << segment_bits;
                let mut segments = Vec::new();
                segments.try_reserve_exact(len.div_ceil(segment_size))?;
                let mut remaining = len;
                while remaining > 0 {
                    let size = remaining.min(segment_size);
                    segments.push(try_filled(size, &mut fill)?);
                    remaining -= size;
                }
                Storage::Large {
                    segments,
                    bits: segment_bits,
                    mask: segment_size - 1,
                }
            }
        };
        Ok(Self { storage, len })
    }

    /// Builds an array of `len` elements pulled one at a time from `next`
    ///
    /// Storage grows as elements arrive instead of being reserved up front,
    /// so a bogus `len` fails on the first missing element.
    pub fn try_from_fn<E>(
        len: usize,
        regime: Regime,
        mut next: impl FnMut() -> Result<T, E>,
    ) -> Result<Self, E> {
        let storage = match regime {
            Regime::Small => {
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(next()?);
                }
                Storage::Small(items)
            }
            Regime::Large { segment_bits } => {
                let segment_size = 1usize << segment_bits;
                let mut segments = Vec::new();
                let mut current = Vec::new();
                for _ in 0..len {
                    current.push(next()?);
                    if current.len() == segment_size {
                        segments.push(std::mem::take(&mut current));
                    }
                }
                if !current.is_empty() {
                    segments.push(current);
                }
                Storage::Large {
                    segments,
                    bits: segment_bits,
                    mask: segment_size - 1,
                }
            }
        };
        Ok(Self { storage, len })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn regime(&self) -> Regime {
        match &self.storage {
            Storage::Small(_) => Regime::Small,
            Storage::Large { bits, .. } => Regime::Large {
                segment_bits: *bits,
            },
        }
    }

    #[inline]
    fn locate(bits: u32, mask: usize, index: usize) -> (usize, usize) {
        (index >> bits, index & mask)
    }

    /// Returns a reference to the element at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> &T {
        assert!(index < self.len, "index {index} out of bounds ({})", self.len);
        match &self.storage {
            Storage::Small(v) => &v[index],
            Storage::Large {
                segments,
                bits,
                mask,
            } => {
                let (s, o) = Self::locate(*bits, *mask, index);
                &segments[s][o]
            }
        }
    }

    /// Returns a mutable reference to the element at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut T {
        assert!(index < self.len, "index {index} out of bounds ({})", self.len);
        match &mut self.storage {
            Storage::Small(v) => &mut v[index],
            Storage::Large {
                segments,
                bits,
                mask,
            } => {
                let (s, o) = Self::locate(*bits, *mask, index);
                &mut segments[s][o]
            }
        }
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: T) {
        *self.get_mut(index) = value;
    }

    /// Swaps two elements, possibly across segments
    pub fn swap(&mut self, a: usize, b: usize) {
        assert!(a < self.len && b < self.len, "swap out of bounds");
        match &mut self.storage {
            Storage::Small(v) => v.swap(a, b),
            Storage::Large {
                segments,
                bits,
                mask,
            } => {
                let (sa, oa) = Self::locate(*bits, *mask, a);
                let (sb, ob) = Self::locate(*bits, *mask, b);
                match sa.cmp(&sb) {
                    Ordering::Equal => segments[sa].swap(oa, ob),
                    Ordering::Less => {
                        let (left, right) = segments.split_at_mut(sb);
                        std::mem::swap(&mut left[sa][oa], &mut right[0][ob]);
                    }
                    Ordering::Greater => {
                        let (left, right) = segments.split_at_mut(sa);
                        std::mem::swap(&mut left[sb][ob], &mut right[0][oa]);
                    }
                }
            }
        }
    }

    /// Contiguous runs of elements in logical order
    pub fn chunks(&self) -> impl Iterator<Item = &[T]> {
        let segments = match &self.storage {
            Storage::Small(v) => std::slice::from_ref(v),
            Storage::Large { segments, .. } => segments.as_slice(),
        };
        segments.iter().map(Vec::as_slice)
    }

    /// Mutable contiguous runs of elements in logical order
    pub fn chunks_mut(&mut self) -> impl Iterator<Item = &mut [T]> {
        let segments = match &mut self.storage {
            Storage::Small(v) => std::slice::from_mut(v),
            Storage::Large { segments, .. } => segments.as_mut_slice(),
        };
        segments.iter_mut().map(Vec::as_mut_slice)
    }

    /// All elements in logical order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chunks().flat_map(<[T]>::iter)
    }

    /// Resets every element
    pub fn fill_with(&mut self, mut fill: impl FnMut() -> T) {
        for chunk in self.chunks_mut() {
            chunk.iter_mut().for_each(|x| *x = fill());
        }
    }

    /// Binary search over the first `len` elements, which must be sorted by `f`
    pub fn binary_search_by_key<K: Ord>(
        &self,
        len: usize,
        key: &K,
        f: impl Fn(&T) -> K,
    ) -> Result<usize, usize> {
        let len = len.min(self.len);
        match &self.storage {
            Storage::Small(v) => v[..len].binary_search_by(|x| f(x).cmp(key)),
            Storage::Large { .. } => {
                let (mut lo, mut hi) = (0, len);
                while lo < hi {
                    let mid = lo + (hi - lo) / 2;
                    match f(self.get(mid)).cmp(key) {
                        Ordering::Less => lo = mid + 1,
                        Ordering::Greater => hi = mid,
                        Ordering::Equal => return Ok(mid),
                    }
                }
                Err(lo)
            }
        }
    }

    /// Sorts the first `len` elements in place by `f`
    ///
    /// The large regime uses a three-way quicksort over logical indices so that
    /// elements move across segment boundaries without a scratch copy.
    pub fn sort_unstable_by_key<K: Ord>(&mut self, len: usize, f: impl Fn(&T) -> K) {
        let len = len.min(self.len);
        if let Storage::Small(v) = &mut self.storage {
            v[..len].sort_unstable_by_key(f);
            return;
        }
        self.quicksort(0, len, &f);
    }

    fn quicksort<K: Ord>(&mut self, mut lo: usize, mut hi: usize, f: &impl Fn(&T) -> K) {
        while hi - lo > INSERTION_THRESHOLD {
            let pivot = self.median_key(lo, hi, f);

            // [lo, lt) < pivot, [lt, gt) == pivot, [gt, hi) > pivot
            let (mut lt, mut i, mut gt) = (lo, lo, hi);
            while i < gt {
                match f(self.get(i)).cmp(&pivot) {
                    Ordering::Less => {
                        self.swap(lt, i);
                        lt += 1;
                        i += 1;
                    }
                    Ordering::Greater => {
                        gt -= 1;
                        self.swap(i, gt);
                    }
                    Ordering::Equal => i += 1,
                }
            }

            // recurse into the smaller side to bound the stack depth
            if lt - lo < hi - gt {
                self.quicksort(lo, lt, f);
                lo = gt;
            } else {
                self.quicksort(gt, hi, f);
                hi = lt;
            }
        }
        self.insertion_sort(lo, hi, f);
    }

    fn median_key<K: Ord>(&self, lo: usize, hi: usize, f: &impl Fn(&T) -> K) -> K {
        let a = f(self.get(lo));
        let b = f(self.get(lo + (hi - lo) / 2));
        let c = f(self.get(hi - 1));
        if a < b {
            if b < c {
                b
            } else if a < c {
                c
            } else {
                a
            }
        } else if a < c {
            a
        } else if b < c {
            c
        } else {
            b
        }
    }

    fn insertion_sort<K: Ord>(&mut self, lo: usize, hi: usize, f: &impl Fn(&T) -> K) {
        for i in lo + 1..hi {
            let mut j = i;
            while j > lo && f(self.get(j)) < f(self.get(j - 1)) {
                self.swap(j, j - 1);
                j -= 1;
            }
        }
    }
}
