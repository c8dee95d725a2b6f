//! Inner tree nodes
//!
//! An inner node carries one aggregated statistics row summarizing its
//! whole subtree: minimum pack key, pack and row counts, disk size sum,
//! and per-column min/max envelopes. The meta row has the same wire
//! shape as a leaf Record, with the schema-hash slot repurposed as the
//! pack count.

use crate::encoding::row::{RowView, RowWriter};
use crate::error::Result;
use crate::schema::Schema;
use crate::types::{
    Value, STATS_COL_OFFSET, STATS_ROW_KEY, STATS_ROW_NVALS, STATS_ROW_SCHEMA, STATS_ROW_SIZE,
};

/// Decoded statistics row, one value per wire position
pub type MetaRow = Vec<Value>;

/// Merge two child meta rows into their parent's aggregate. Absent
/// children (beyond the populated tree edge) contribute nothing.
pub fn merge_meta(left: Option<&MetaRow>, right: Option<&MetaRow>) -> Option<MetaRow> {
    match (left, right) {
        (None, None) => None,
        (Some(row), None) | (None, Some(row)) => Some(row.clone()),
        (Some(l), Some(r)) => {
            let mut out = Vec::with_capacity(l.len());
            for (i, (a, b)) in l.iter().zip(r.iter()).enumerate() {
                let v = match i {
                    STATS_ROW_KEY => Value::U32(a.as_u32().min(b.as_u32())),
                    STATS_ROW_SCHEMA | STATS_ROW_NVALS | STATS_ROW_SIZE => {
                        Value::U64(a.as_u64().wrapping_add(b.as_u64()))
                    }
                    _ => {
                        if (i - STATS_COL_OFFSET) % 2 == 0 {
                            a.clone().min_of(b.clone())
                        } else {
                            a.clone().max_of(b.clone())
                        }
                    }
                };
                out.push(v);
            }
            Some(out)
        }
    }
}

/// Wire-encode a meta row; an absent row encodes as all zeros
pub fn encode_meta_row(schema: &Schema, meta: Option<&MetaRow>) -> Result<Vec<u8>> {
    let types = schema.stats_types();
    let mut w = RowWriter::new(&types);
    match meta {
        Some(row) => {
            for v in row {
                w.write(v);
            }
        }
        None => {
            for t in &types {
                w.write(&t.zero());
            }
        }
    }
    w.finish()
}

/// Inner node of the statistics tree
#[derive(Debug, Clone, Default)]
pub struct INode {
    /// Aggregated subtree statistics; None until first propagation
    pub meta: Option<MetaRow>,
    /// On-disk version, bumped on every store
    pub version: u32,
    pub dirty: bool,
}

impl INode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregated (min, max) for a table column, used during descent
    pub fn min_max(&self, schema: &Schema, field: usize) -> Option<(Value, Value)> {
        let meta = self.meta.as_ref()?;
        let typ = schema.field(field).typ;
        let min = meta
            .get(crate::types::min_col(field))
            .cloned()
            .unwrap_or_else(|| typ.zero());
        let max = meta
            .get(crate::types::max_col(field))
            .cloned()
            .unwrap_or_else(|| typ.zero());
        Some((min, max))
    }

    pub fn encode_meta(&self, schema: &Schema) -> Result<Vec<u8>> {
        encode_meta_row(schema, self.meta.as_ref())
    }

    pub fn decode_meta(schema: &Schema, version: u32, buf: &[u8]) -> Result<Self> {
        let types = schema.stats_types();
        let view = RowView::new(&types, buf)?;
        let meta = (0..view.num_cols()).map(|i| view.get(i)).collect();
        Ok(Self {
            meta: Some(meta),
            version,
            dirty: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::types::ValueType;

    fn schema() -> Schema {
        Schema::new(
            "t",
            vec![
                Field::new(0, "rid", ValueType::U64),
                Field::new(1, "v", ValueType::I64),
            ],
            0,
        )
    }

    fn row(key: u32, packs: u64, nvals: u64, rid: (u64, u64), v: (i64, i64)) -> MetaRow {
        vec![
            Value::U32(key),
            Value::U64(packs),
            Value::U64(nvals),
            Value::U64(nvals * 100),
            Value::U64(rid.0),
            Value::U64(rid.1),
            Value::I64(v.0),
            Value::I64(v.1),
        ]
    }

    #[test]
    fn test_merge_sums_and_envelopes() {
        let l = row(1, 2, 100, (1, 200), (-5, 10));
        let r = row(9, 3, 50, (201, 260), (-1, 99));
        let m = merge_meta(Some(&l), Some(&r)).unwrap();
        assert_eq!(m[STATS_ROW_KEY], Value::U32(1));
        assert_eq!(m[STATS_ROW_SCHEMA], Value::U64(5));
        assert_eq!(m[STATS_ROW_NVALS], Value::U64(150));
        assert_eq!(m[4], Value::U64(1));
        assert_eq!(m[5], Value::U64(260));
        assert_eq!(m[6], Value::I64(-5));
        assert_eq!(m[7], Value::I64(99));
    }

    #[test]
    fn test_merge_single_child() {
        let l = row(4, 1, 10, (1, 10), (0, 1));
        assert_eq!(merge_meta(Some(&l), None), Some(l.clone()));
        assert_eq!(merge_meta(None, Some(&l)), Some(l));
        assert_eq!(merge_meta(None, None), None);
    }

    #[test]
    fn test_meta_codec_roundtrip() {
        let s = schema();
        let node = INode {
            meta: Some(row(7, 4, 1000, (1, 5000), (-3, 3))),
            version: 2,
            dirty: true,
        };
        let buf = node.encode_meta(&s).unwrap();
        let back = INode::decode_meta(&s, 2, &buf).unwrap();
        assert_eq!(back.meta, node.meta);
        assert_eq!(back.version, 2);
        assert!(!back.dirty);
    }
}
