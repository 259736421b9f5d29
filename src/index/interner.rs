use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{IndexError, LoadError, Result};

/// Index reserved for "no value"
pub const ABSENT: u16 = 0;

/// Largest number of distinct values an index can hold
pub const MAX_VALUES: usize = u16::MAX as usize - 1;

/// Bidirectional map between taxon values and compact 16-bit indices
///
/// Indices are handed out densely starting at 1 in insertion order and are
/// never reused, so an index stays valid for the lifetime of the interner.
#[derive(Debug, Clone, Default)]
pub struct ValueInterner {
    /// `values[i - 1]` is the value of index `i`
    values: Vec<String>,
    lookup: HashMap<String, u16>,
}
impl ValueInterner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `value`, assigning a new one if needed
    pub fn intern(&mut self, value: &str) -> Result<u16> {
        if let Some(&idx) = self.lookup.get(value) {
            return Ok(idx);
        }
        if self.values.len() >= MAX_VALUES {
            return Err(IndexError::InternerFull { max: MAX_VALUES }.into());
        }
        self.values.push(value.to_string());
        let idx = self.values.len() as u16;
        self.lookup.insert(value.to_string(), idx);
        Ok(idx)
    }

    /// Index of an already interned value
    #[must_use]
    pub fn index_of(&self, value: &str) -> Option<u16> {
        self.lookup.get(value).copied()
    }

    /// Value of an index; `None` for [`ABSENT`] or unknown indices
    #[must_use]
    pub fn value(&self, idx: u16) -> Option<&str> {
        if idx == ABSENT {
            return None;
        }
        self.values.get(idx as usize - 1).map(String::as_str)
    }

    /// Number of interned values
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values with their indices, in index order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u16 + 1, v.as_str()))
    }

    /// Writes every value as a length-prefixed UTF-8 string in index order
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for value in &self.values {
            writer.write_u32::<LittleEndian>(value.len() as u32)?;
            writer.write_all(value.as_bytes())?;
        }
        Ok(())
    }

    /// Reads `count` values written by [`write_to`](Self::write_to)
    pub fn read_from<R: Read>(reader: &mut R, count: usize) -> Result<Self> {
        if count > MAX_VALUES {
            return Err(LoadError::Corrupt(format!("{count} interned values exceed {MAX_VALUES}")).into());
        }
        let mut interner = Self::new();
        let mut buf = Vec::new();
        for _ in 0..count {
            let len = reader.read_u32::<LittleEndian>()?;
            buf.clear();
            // the buffer only grows with bytes actually read
            reader.by_ref().take(u64::from(len)).read_to_end(&mut buf)?;
            if buf.len() != len as usize {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            let value = std::str::from_utf8(&buf)?;
            if interner.index_of(value).is_some() {
                return Err(LoadError::Corrupt(format!("duplicate interned value {value}")).into());
            }
            interner.intern(value)?;
        }
        Ok(interner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut interner = ValueInterner::new();
        let a = interner.intern("562").unwrap();
        let b = interner.intern("9606").unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(interner.intern("562").unwrap(), a);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_value_lookup() {
        let mut interner = ValueInterner::new();
        let idx = interner.intern("taxonA").unwrap();
        assert_eq!(interner.value(idx), Some("taxonA"));
        assert_eq!(interner.value(ABSENT), None);
        assert_eq!(interner.value(99), None);
        assert_eq!(interner.index_of("taxonA"), Some(idx));
        assert_eq!(interner.index_of("taxonB"), None);
    }

    #[test]
    fn test_interner_full() {
        let mut interner = ValueInterner::new();
        for i in 0..MAX_VALUES {
            interner.intern(&i.to_string()).unwrap();
        }
        assert_eq!(interner.len(), MAX_VALUES);
        // existing values still resolve
        assert!(interner.intern("0").is_ok());
        let err = interner.intern("overflow").unwrap_err();
        assert!(matches!(
            err,
            crate::Error::IndexError(IndexError::InternerFull { .. })
        ));
    }

    #[test]
    fn test_roundtrip() {
        let mut interner = ValueInterner::new();
        for value in ["1", "2", "Escherichia coli", "ünïcode"] {
            interner.intern(value).unwrap();
        }
        let mut buffer = Vec::new();
        interner.write_to(&mut buffer).unwrap();
        let loaded = ValueInterner::read_from(&mut buffer.as_slice(), interner.len()).unwrap();
        let expected: Vec<_> = interner.iter().collect();
        let found: Vec<_> = loaded.iter().collect();
        assert_eq!(expected, found);
    }
}
