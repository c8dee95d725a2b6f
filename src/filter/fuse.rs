//! Binary fuse filters: static, space-optimal membership
//!
//! Built once per pack write from the deduplicated 64-bit key set of a
//! column. Construction is probabilistic and retried internally by the
//! builder; exhausting retries surfaces as a filter build failure.

use std::hash::BuildHasher;

use xorf::{BinaryFuse8, Filter as _};

use crate::column::ColumnVec;
use crate::error::{Error, Result};
use crate::types::Value;

// Fixed seeds keep probe hashes stable across processes
const HASH_SEEDS: (u64, u64, u64, u64) = (
    0x9e3779b97f4a7c15,
    0x6a09e667f3bcc908,
    0xbb67ae8584caa73b,
    0x3c6ef372fe94f82b,
);

/// Map a value to the filter's 64-bit key space. Integers map to their
/// raw bits, floats to their bit pattern, byte strings to a seeded hash.
fn fuse_key(val: &Value) -> u64 {
    match val {
        Value::U32(v) => *v as u64,
        Value::U64(v) => *v,
        Value::I64(v) => *v as u64,
        Value::F64(v) => v.to_bits(),
        Value::Bytes(v) => {
            let state = ahash::RandomState::with_seeds(
                HASH_SEEDS.0,
                HASH_SEEDS.1,
                HASH_SEEDS.2,
                HASH_SEEDS.3,
            );
            state.hash_one(v.as_slice())
        }
    }
}

/// Binary fuse filter over one column of one data pack
pub struct FuseFilter {
    filter: BinaryFuse8,
}

impl FuseFilter {
    /// Build from a column's values, deduplicating keys first
    pub fn build(values: &ColumnVec) -> Result<Self> {
        let mut keys: Vec<u64> = (0..values.len()).map(|i| fuse_key(&values.get(i))).collect();
        keys.sort_unstable();
        keys.dedup();
        let filter = BinaryFuse8::try_from(&keys)
            .map_err(|e| Error::FilterBuildFailure(e.to_string()))?;
        Ok(Self { filter })
    }

    /// Probe for a value. False means definitely absent.
    #[inline]
    pub fn contains(&self, val: &Value) -> bool {
        self.filter.contains(&fuse_key(val))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.filter)
            .map_err(|e| Error::StorageCorrupt(format!("fuse filter encode: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let filter: BinaryFuse8 = bincode::deserialize(data)
            .map_err(|e| Error::StorageCorrupt(format!("fuse filter decode: {e}")))?;
        Ok(Self { filter })
    }
}
