//! Leaf tree nodes
//!
//! A leaf owns a columnar statistics pack of up to
//! [`STATS_PACK_SIZE`](crate::types::STATS_PACK_SIZE) Records sorted by
//! pack key, plus one aggregated meta row summarizing its content.
//! Records append at the tail; update and delete address rows by pack
//! key via binary search. Per-row data pack versions live in a side
//! vector outside the wire row and persist as an extra block.
//!
//! After a cold load only the key, row-count and row-id columns are in
//! memory. Mutation requires a fully materialized clone; queries load
//! missing columns into a private overlay instead of touching a node
//! shared with concurrent readers.

use crate::column::ColumnVec;
use crate::encoding::row::RowWriter;
use crate::error::{Error, Result};
use crate::pack::PackStats;
use crate::schema::Schema;
use crate::tree::inode::MetaRow;
use crate::types::{
    max_col, min_col, Value, STATS_PACK_SIZE, STATS_ROW_KEY, STATS_ROW_NVALS, STATS_ROW_SCHEMA,
    STATS_ROW_SIZE,
};

/// Leaf node of the statistics tree
#[derive(Debug, Clone)]
pub struct SNode {
    key: u32,
    version: u32,
    len: usize,
    /// One slot per wire column; None until loaded from the block bucket
    cols: Vec<Option<ColumnVec>>,
    /// Per-row data pack versions, loaded eagerly
    pack_versions: Option<Vec<u32>>,
    pub meta: Option<MetaRow>,
    pub disk_size: u64,
    pub dirty: bool,
}

impl SNode {
    /// Fresh writable leaf with all columns materialized
    pub fn new(key: u32, schema: &Schema) -> Self {
        let cols = schema
            .stats_types()
            .into_iter()
            .map(|t| Some(ColumnVec::new(t)))
            .collect();
        Self {
            key,
            version: 0,
            len: 0,
            cols,
            pack_versions: Some(Vec::new()),
            meta: None,
            disk_size: 0,
            dirty: false,
        }
    }

    /// Shell reconstructed from storage; columns arrive separately
    pub fn new_shell(key: u32, version: u32, schema: &Schema, meta: MetaRow) -> Self {
        Self {
            key,
            version,
            len: 0,
            cols: vec![None; schema.num_stats_cols()],
            pack_versions: None,
            meta: Some(meta),
            disk_size: 0,
            dirty: false,
        }
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn set_version(&mut self, ver: u32) {
        self.version = ver;
    }

    pub fn n_packs(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_space(&self) -> bool {
        self.len < STATS_PACK_SIZE
    }

    /// True when every column and the version vector are in memory
    pub fn is_complete(&self) -> bool {
        self.pack_versions.is_some() && self.cols.iter().all(|c| c.is_some())
    }

    pub fn col(&self, i: usize) -> Option<&ColumnVec> {
        self.cols.get(i).and_then(|c| c.as_ref())
    }

    /// Install a loaded column; syncs the row count from the key column
    pub fn set_col(&mut self, i: usize, col: ColumnVec) {
        if i == STATS_ROW_KEY {
            self.len = col.len();
        }
        self.cols[i] = Some(col);
    }

    pub fn pack_versions(&self) -> Option<&[u32]> {
        self.pack_versions.as_deref()
    }

    pub fn set_pack_versions(&mut self, vers: Vec<u32>) {
        self.pack_versions = Some(vers);
    }

    fn keys(&self) -> &[u32] {
        match self.col(STATS_ROW_KEY) {
            Some(ColumnVec::U32(v)) => v,
            _ => &[],
        }
    }

    pub fn min_key(&self) -> u32 {
        self.keys().first().copied().unwrap_or(0)
    }

    pub fn max_key(&self) -> u32 {
        self.keys().last().copied().unwrap_or(0)
    }

    pub fn key_at(&self, i: usize) -> u32 {
        self.keys().get(i).copied().unwrap_or(0)
    }

    pub fn nvals_at(&self, i: usize) -> u64 {
        self.col(STATS_ROW_NVALS).map_or(0, |c| c.get(i).as_u64())
    }

    pub fn version_at(&self, i: usize) -> u32 {
        self.pack_versions
            .as_ref()
            .and_then(|v| v.get(i).copied())
            .unwrap_or(0)
    }

    /// Key, version and row count of the tail record
    pub fn last_info(&self) -> (u32, u32, u64) {
        if self.len == 0 {
            return (0, 0, 0);
        }
        let i = self.len - 1;
        (self.key_at(i), self.version_at(i), self.nvals_at(i))
    }

    /// Binary search the sorted key column
    pub fn find_key(&self, key: u32) -> Option<usize> {
        let keys = self.keys();
        let i = keys.partition_point(|&k| k < key);
        (i < keys.len() && keys[i] == key).then_some(i)
    }

    /// Append a new Record at the tail. The caller guarantees the node
    /// is materialized and the key extends the sorted order.
    pub fn append_record(&mut self, p: &PackStats) {
        debug_assert!(self.is_complete());
        debug_assert!(self.len == 0 || p.key > self.max_key());
        self.push_header(p);
        for (i, c) in p.columns.iter().enumerate() {
            if let Some(col) = self.cols[min_col(i)].as_mut() {
                col.push(&c.min);
            }
            if let Some(col) = self.cols[max_col(i)].as_mut() {
                col.push(&c.max);
            }
        }
        if let Some(vers) = self.pack_versions.as_mut() {
            vers.push(p.version);
        }
        self.len += 1;
        self.dirty = true;
    }

    fn push_header(&mut self, p: &PackStats) {
        if let Some(c) = self.cols[STATS_ROW_KEY].as_mut() {
            c.push(&Value::U32(p.key));
        }
        if let Some(c) = self.cols[STATS_ROW_SCHEMA].as_mut() {
            c.push(&Value::U64(p.schema_id));
        }
        if let Some(c) = self.cols[STATS_ROW_NVALS].as_mut() {
            c.push(&Value::U64(p.n_values));
        }
        if let Some(c) = self.cols[STATS_ROW_SIZE].as_mut() {
            c.push(&Value::U64(p.disk_size));
        }
    }

    /// Mutate the Record for `p.key` in place. Only dirty columns are
    /// touched. Returns whether anything changed.
    pub fn update_record(&mut self, p: &PackStats) -> Result<bool> {
        debug_assert!(self.is_complete());
        let k = self.find_key(p.key).ok_or(Error::MissingRecord(p.key))?;
        let mut changed = false;

        for (i, c) in p.columns.iter().enumerate() {
            if !c.dirty {
                continue;
            }
            for (pos, val) in [(min_col(i), &c.min), (max_col(i), &c.max)] {
                if let Some(col) = self.cols[pos].as_mut() {
                    if &col.get(k) != val {
                        col.set(k, val);
                        changed = true;
                    }
                }
            }
        }

        for (pos, val) in [
            (STATS_ROW_SCHEMA, Value::U64(p.schema_id)),
            (STATS_ROW_NVALS, Value::U64(p.n_values)),
            (STATS_ROW_SIZE, Value::U64(p.disk_size)),
        ] {
            if let Some(col) = self.cols[pos].as_mut() {
                if col.get(k) != val {
                    col.set(k, &val);
                    changed = true;
                }
            }
        }

        if let Some(vers) = self.pack_versions.as_mut() {
            if vers[k] != p.version {
                vers[k] = p.version;
                changed = true;
            }
        }

        self.dirty |= changed;
        Ok(changed)
    }

    /// Remove the Record for `key`
    pub fn delete_record(&mut self, key: u32) -> Result<()> {
        debug_assert!(self.is_complete());
        let k = self.find_key(key).ok_or(Error::MissingRecord(key))?;
        for col in self.cols.iter_mut().flatten() {
            col.remove(k);
        }
        if let Some(vers) = self.pack_versions.as_mut() {
            vers.remove(k);
        }
        self.len -= 1;
        self.dirty = true;
        Ok(())
    }

    /// Recompute the aggregated meta row. Returns whether it changed.
    pub fn build_meta(&mut self, schema: &Schema) -> bool {
        let types = schema.stats_types();
        let mut row: MetaRow = Vec::with_capacity(types.len());
        for (i, typ) in types.iter().enumerate() {
            let val = match i {
                STATS_ROW_KEY => Value::U32(self.min_key()),
                STATS_ROW_SCHEMA => Value::U64(self.len as u64),
                STATS_ROW_NVALS | STATS_ROW_SIZE => {
                    let sum = self.col(i).map_or(0u64, |c| {
                        (0..c.len()).map(|j| c.get(j).as_u64()).sum()
                    });
                    Value::U64(sum)
                }
                _ => match self.col(i) {
                    Some(c) => {
                        if (i - crate::types::STATS_COL_OFFSET) % 2 == 0 {
                            c.min_value()
                        } else {
                            c.max_value()
                        }
                    }
                    // keep the stored aggregate for unloaded columns
                    None => self
                        .meta
                        .as_ref()
                        .and_then(|m| m.get(i).cloned())
                        .unwrap_or_else(|| typ.zero()),
                },
            };
            row.push(val);
        }
        let changed = self.meta.as_ref() != Some(&row);
        if changed {
            self.meta = Some(row);
            self.dirty = true;
        }
        changed
    }

    /// Aggregated (min, max) for a table column from the meta row
    pub fn min_max(&self, schema: &Schema, field: usize) -> Option<(Value, Value)> {
        let meta = self.meta.as_ref()?;
        let typ = schema.field(field).typ;
        let min = meta
            .get(min_col(field))
            .cloned()
            .unwrap_or_else(|| typ.zero());
        let max = meta
            .get(max_col(field))
            .cloned()
            .unwrap_or_else(|| typ.zero());
        Some((min, max))
    }

    /// Wire-encode one Record row, for iterator consumers
    pub fn encode_row(&self, schema: &Schema, i: usize) -> Result<Vec<u8>> {
        let types = schema.stats_types();
        let mut w = RowWriter::new(&types);
        for (pos, typ) in types.iter().enumerate() {
            match self.col(pos) {
                Some(c) => w.write(&c.get(i)),
                None => w.write(&typ.zero()),
            }
        }
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::ColumnStats;
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

    fn pack(key: u32, nvals: u64, rid: (u64, u64), v: (i64, i64)) -> PackStats {
        PackStats {
            key,
            version: 1,
            schema_id: 7,
            n_values: nvals,
            disk_size: nvals * 10,
            columns: vec![
                ColumnStats::new(Value::U64(rid.0), Value::U64(rid.1)),
                ColumnStats::new(Value::I64(v.0), Value::I64(v.1)),
            ],
        }
    }

    #[test]
    fn test_append_and_meta() {
        let s = schema();
        let mut n = SNode::new(1, &s);
        n.append_record(&pack(1, 100, (1, 100), (-5, 5)));
        n.append_record(&pack(2, 50, (101, 150), (0, 99)));
        assert_eq!(n.n_packs(), 2);
        assert_eq!(n.min_key(), 1);
        assert_eq!(n.max_key(), 2);
        assert_eq!(n.last_info(), (2, 1, 50));

        assert!(n.build_meta(&s));
        let meta = n.meta.clone().unwrap();
        assert_eq!(meta[STATS_ROW_KEY], Value::U32(1));
        assert_eq!(meta[STATS_ROW_SCHEMA], Value::U64(2));
        assert_eq!(meta[STATS_ROW_NVALS], Value::U64(150));
        assert_eq!(n.min_max(&s, 1), Some((Value::I64(-5), Value::I64(99))));

        // unchanged content does not flag a change
        assert!(!n.build_meta(&s));
    }

    #[test]
    fn test_update_record() {
        let s = schema();
        let mut n = SNode::new(1, &s);
        n.append_record(&pack(1, 100, (1, 100), (-5, 5)));
        n.build_meta(&s);

        // clean columns are skipped
        let mut p = pack(1, 100, (1, 100), (-50, 50));
        p.columns[1].dirty = false;
        assert!(!n.update_record(&p).unwrap());

        p.columns[1].dirty = true;
        p.version = 2;
        assert!(n.update_record(&p).unwrap());
        assert_eq!(n.version_at(0), 2);
        assert!(n.build_meta(&s));
        assert_eq!(n.min_max(&s, 1), Some((Value::I64(-50), Value::I64(50))));

        let missing = pack(99, 1, (0, 0), (0, 0));
        assert!(matches!(
            n.update_record(&missing),
            Err(Error::MissingRecord(99))
        ));
    }

    #[test]
    fn test_delete_record() {
        let s = schema();
        let mut n = SNode::new(1, &s);
        for k in 1..=3 {
            n.append_record(&pack(k, 10, (k as u64 * 10, k as u64 * 10 + 9), (0, 1)));
        }
        n.delete_record(2).unwrap();
        assert_eq!(n.n_packs(), 2);
        assert_eq!(n.find_key(2), None);
        assert_eq!(n.key_at(1), 3);
        assert!(matches!(n.delete_record(2), Err(Error::MissingRecord(2))));
    }

    #[test]
    fn test_row_codec() {
        let s = schema();
        let mut n = SNode::new(1, &s);
        n.append_record(&pack(5, 10, (1, 10), (-1, 1)));
        let buf = n.encode_row(&s, 0).unwrap();
        let types = s.stats_types();
        let view = crate::encoding::row::RowView::new(&types, &buf).unwrap();
        assert_eq!(view.get(STATS_ROW_KEY), Value::U32(5));
        assert_eq!(view.get(4), Value::U64(1));
        assert_eq!(view.get(7), Value::I64(1));
    }
}
