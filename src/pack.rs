//! Pack descriptors submitted by the merge engine
//!
//! The index never reads table data. Everything it knows about a data
//! pack arrives through one of these descriptors on Add/Update/Delete:
//! counters, per-column min/max, dirty flags, a cardinality hint, and
//! (for columns that declare a filter) the raw values to build it from.

use crate::column::ColumnVec;
use crate::types::Value;

/// Per-column statistics of one data pack
#[derive(Debug, Clone)]
pub struct ColumnStats {
    pub min: Value,
    pub max: Value,
    /// Set when this column changed since the last persisted version,
    /// forcing a filter rebuild
    pub dirty: bool,
    /// Estimated or exact distinct-value count, used to size filters
    pub cardinality: u32,
    /// Raw column values for filter construction. None for columns
    /// without a filter, or on delete.
    pub values: Option<ColumnVec>,
}

impl ColumnStats {
    pub fn new(min: Value, max: Value) -> Self {
        Self {
            min,
            max,
            dirty: true,
            cardinality: 0,
            values: None,
        }
    }

    pub fn with_cardinality(mut self, card: u32) -> Self {
        self.cardinality = card;
        self
    }

    pub fn with_values(mut self, values: ColumnVec) -> Self {
        self.values = Some(values);
        self
    }
}

/// Everything the merge engine reports about one data pack
#[derive(Debug, Clone)]
pub struct PackStats {
    /// Pack key, unique per table
    pub key: u32,
    /// On-disk version of the pack's data blocks
    pub version: u32,
    /// Hash of the schema the pack was written with
    pub schema_id: u64,
    /// Number of table rows in the pack
    pub n_values: u64,
    /// Compressed on-disk size in bytes
    pub disk_size: u64,
    /// One entry per table column, in declaration order
    pub columns: Vec<ColumnStats>,
}

impl PackStats {
    /// True when the pack holds no rows and its record must be removed
    pub fn is_empty(&self) -> bool {
        self.n_values == 0
    }

    /// True when any column changed since the last persisted version
    pub fn any_dirty(&self) -> bool {
        self.columns.iter().any(|c| c.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    #[test]
    fn test_dirty_flags() {
        let mut p = PackStats {
            key: 1,
            version: 1,
            schema_id: 42,
            n_values: 10,
            disk_size: 100,
            columns: vec![
                ColumnStats::new(Value::U64(0), Value::U64(9)),
                ColumnStats::new(Value::I64(-5), Value::I64(5)),
            ],
        };
        assert!(p.any_dirty());
        for c in p.columns.iter_mut() {
            c.dirty = false;
        }
        assert!(!p.any_dirty());
        assert!(!p.is_empty());
        p.n_values = 0;
        assert!(p.is_empty());
    }

    #[test]
    fn test_column_builder() {
        let c = ColumnStats::new(Value::U32(1), Value::U32(9))
            .with_cardinality(7)
            .with_values(ColumnVec::new(ValueType::U32));
        assert_eq!(c.cardinality, 7);
        assert!(c.values.is_some());
    }
}
