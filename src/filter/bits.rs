//! Exact bitmap filters for low-cardinality integer columns
//!
//! A compressed bitmap of the exact values seen in a pack answers
//! membership with no false positives. Only worth building when the
//! value range is narrow; wide ranges fall back to bloom or fuse.

use roaring::RoaringTreemap;

use crate::column::ColumnVec;
use crate::error::{Error, Result};
use crate::types::Value;

/// Widest `max - min` span a bitmap filter will cover. Beyond this a
/// dense pack would cost more than a probabilistic filter.
pub const BITS_MAX_WIDTH: u64 = 1 << 20;

fn bits_key(val: &Value) -> Option<u64> {
    match val {
        Value::U32(v) => Some(*v as u64),
        Value::U64(v) => Some(*v),
        // shift into unsigned space to keep bitmap keys ordered
        Value::I64(v) => Some((*v as u64) ^ (1 << 63)),
        _ => None,
    }
}

/// Exact membership bitmap over one integer column of one data pack
pub struct BitsFilter {
    bitmap: RoaringTreemap,
}

impl BitsFilter {
    /// Decide whether a bitmap beats a probabilistic filter here. The
    /// cutoff depends on the value range width, not the row count.
    pub fn worthwhile(min: &Value, max: &Value, cardinality: u32) -> bool {
        if cardinality <= 1 {
            return false;
        }
        match (bits_key(min), bits_key(max)) {
            (Some(lo), Some(hi)) => hi.wrapping_sub(lo) <= BITS_MAX_WIDTH,
            _ => false,
        }
    }

    /// Build from a column's values. Returns None for non-integer
    /// columns or trivial cardinality.
    pub fn build(values: &ColumnVec, cardinality: u32) -> Option<Self> {
        if cardinality <= 1 {
            return None;
        }
        let mut bitmap = RoaringTreemap::new();
        for i in 0..values.len() {
            bitmap.insert(bits_key(&values.get(i))?);
        }
        Some(Self { bitmap })
    }

    /// Exact membership test
    #[inline]
    pub fn contains(&self, val: &Value) -> bool {
        bits_key(val).is_some_and(|k| self.bitmap.contains(k))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.bitmap.serialized_size());
        self.bitmap
            .serialize_into(&mut buf)
            .map_err(|e| Error::StorageCorrupt(format!("bits filter encode: {e}")))?;
        Ok(buf)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let bitmap = RoaringTreemap::deserialize_from(data)
            .map_err(|e| Error::StorageCorrupt(format!("bits filter decode: {e}")))?;
        Ok(Self { bitmap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    #[test]
    fn test_exact_membership() {
        let mut c = ColumnVec::new(ValueType::I64);
        for v in [-5i64, 0, 3, 3, 99] {
            c.push(&Value::I64(v));
        }
        let f = BitsFilter::build(&c, 4).unwrap();
        for v in [-5i64, 0, 3, 99] {
            assert!(f.contains(&Value::I64(v)));
        }
        for v in [-6i64, 1, 4, 100] {
            assert!(!f.contains(&Value::I64(v)));
        }
    }

    #[test]
    fn test_roundtrip() {
        let mut c = ColumnVec::new(ValueType::U32);
        for v in [1u32, 7, 1000] {
            c.push(&Value::U32(v));
        }
        let f = BitsFilter::build(&c, 3).unwrap();
        let g = BitsFilter::from_bytes(&f.to_bytes().unwrap()).unwrap();
        assert!(g.contains(&Value::U32(7)));
        assert!(!g.contains(&Value::U32(8)));
    }

    #[test]
    fn test_worthwhile_cutoff() {
        assert!(BitsFilter::worthwhile(&Value::U64(10), &Value::U64(500), 5));
        assert!(!BitsFilter::worthwhile(
            &Value::U64(0),
            &Value::U64(u64::MAX),
            5
        ));
        assert!(!BitsFilter::worthwhile(&Value::U64(1), &Value::U64(1), 1));
        assert!(!BitsFilter::worthwhile(
            &Value::Bytes(vec![]),
            &Value::Bytes(vec![1]),
            5
        ));
    }
}
