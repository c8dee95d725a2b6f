//! Query iteration over the statistics tree
//!
//! A query walks the inner tree breadth first, testing each child's
//! aggregated min/max envelope against the filter tree and descending
//! only into matching subtrees. Every surviving leaf runs a vectorized
//! per-record match over its statistics pack, then membership filters
//! (bloom, fuse, bitmap) veto records whose on-disk filter rejects an
//! equality or In probe. The iterator yields one matching data pack
//! descriptor at a time, in ascending or descending key order.
//!
//! Range pruning never produces false negatives. Membership filters are
//! consulted only for Eq/In and any load or decode problem keeps the
//! record, so errors degrade to extra pack reads, not missed rows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;

use crate::bitset::Bitset;
use crate::column::ColumnVec;
use crate::encoding::keys::{
    encode_block_key, encode_filter_key, STATS_BLOCK_KEY, STATS_BUCKETS, STATS_FILTER_KEY,
    STATS_RANGE_KEY,
};
use crate::encoding::row::RowWriter;
use crate::error::{Error, Result};
use crate::filter::bits::BitsFilter;
use crate::filter::bloom::BloomFilter;
use crate::filter::fuse::FuseFilter;
use crate::filter::range::RangeFilter;
use crate::filter::{CondValue, Condition, Filter};
use crate::index::StatsIndex;
use crate::schema::{FilterKind, Schema};
use crate::snapshot::Snapshot;
use crate::store::{Backend, ReadTx};
use crate::tree::inode::MetaRow;
use crate::tree::snode::SNode;
use crate::tree::Tree;
use crate::types::{max_col, min_col, ScanRange, SortOrder, Value};

/// Shared cancellation flag checked between leaf visits
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Placement info for a single pack, returned by row-id lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackPlacement {
    pub key: u32,
    pub n_values: u64,
    pub is_full: bool,
}

/// Aggregated (min, max) of one table column from a meta row
fn meta_ranges(meta: &MetaRow, schema: &Schema, field: usize) -> (Value, Value) {
    let typ = schema.field(field).typ;
    let min = meta
        .get(min_col(field))
        .cloned()
        .unwrap_or_else(|| typ.zero());
    let max = meta
        .get(max_col(field))
        .cloned()
        .unwrap_or_else(|| typ.zero());
    (min, max)
}

/// Breadth-first frontier walk: returns the leaf indexes whose subtree
/// envelope can satisfy the filter, in ascending order
fn find_candidates(tree: &Tree, filter: Option<&Filter>, schema: &Schema) -> Vec<usize> {
    let n_leaves = tree.num_leaves();
    if n_leaves == 0 {
        return Vec::new();
    }
    let Some(filter) = filter else {
        return (0..n_leaves).collect();
    };
    let inner = tree.inner_len();
    let base = inner - 1;
    let total = base + n_leaves;
    let mut pending = Bitset::new(total);
    pending.set(0);
    for slot in 0..base {
        if !pending.is_set(slot) {
            continue;
        }
        for child in [2 * slot + 1, 2 * slot + 2] {
            if child >= total {
                continue;
            }
            let Some(meta) = tree.child_meta(child) else {
                continue;
            };
            if filter.match_ranges(&|f| meta_ranges(meta, schema, f)) {
                pending.set(child);
            }
        }
    }
    (base..total)
        .filter(|&s| pending.is_set(s))
        .map(|s| s - base)
        .collect()
}

/// Read-only leaf with a private overlay for columns loaded on demand,
/// so shared snapshot nodes are never mutated by queries
struct LeafView {
    node: Arc<SNode>,
    extra: AHashMap<usize, ColumnVec>,
}

impl LeafView {
    fn new(node: Arc<SNode>) -> Self {
        Self {
            node,
            extra: AHashMap::new(),
        }
    }

    fn col(&self, i: usize) -> Option<&ColumnVec> {
        self.node.col(i).or_else(|| self.extra.get(&i))
    }

    fn value(&self, col: usize, row: usize) -> Option<Value> {
        self.col(col).map(|c| c.get(row))
    }

    fn encode_row(&self, schema: &Schema, row: usize) -> Result<Vec<u8>> {
        let types = schema.stats_types();
        let mut w = RowWriter::new(&types);
        for (pos, typ) in types.iter().enumerate() {
            match self.col(pos) {
                Some(c) => w.write(&c.get(row)),
                None => w.write(&typ.zero()),
            }
        }
        w.finish()
    }
}

/// One matched leaf: its overlay view and the matching row positions in
/// yield order
struct LeafMatch {
    view: LeafView,
    rows: Vec<usize>,
    pos: usize,
}

/// Streaming iterator over matching data pack descriptors
pub struct QueryIterator<B: Backend> {
    snap: Arc<Snapshot>,
    db: Arc<B>,
    schema: Arc<Schema>,
    keys: [Vec<u8>; STATS_BUCKETS],
    filter: Option<Filter>,
    order: SortOrder,
    cancel: CancelToken,
    max_pack_rows: u64,
    /// Candidate leaf indexes in visit order
    candidates: Vec<usize>,
    next_leaf: usize,
    cur: Option<LeafMatch>,
}

impl<B: Backend> Drop for QueryIterator<B> {
    fn drop(&mut self) {
        self.snap.release();
    }
}

impl<B: Backend + 'static> QueryIterator<B> {
    /// A clonable handle to cancel this query from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Advance to the next matching pack. Returns false when exhausted.
    pub fn next(&mut self) -> Result<bool> {
        loop {
            if let Some(cur) = self.cur.as_mut() {
                cur.pos += 1;
                if cur.pos < cur.rows.len() {
                    return Ok(true);
                }
                self.cur = None;
            }
            let Some(&j) = self.candidates.get(self.next_leaf) else {
                return Ok(false);
            };
            self.next_leaf += 1;
            if self.cancel.is_canceled() {
                return Err(Error::Canceled);
            }
            let lm = self.match_leaf(j)?;
            if !lm.rows.is_empty() {
                self.cur = Some(lm);
                return Ok(true);
            }
        }
    }

    fn row(&self) -> Option<(&LeafMatch, usize)> {
        let cur = self.cur.as_ref()?;
        cur.rows.get(cur.pos).map(|&r| (cur, r))
    }

    /// Key of the current data pack
    pub fn key(&self) -> u32 {
        self.row().map_or(0, |(cur, r)| cur.view.node.key_at(r))
    }

    /// Row count of the current data pack
    pub fn row_count(&self) -> u64 {
        self.row().map_or(0, |(cur, r)| cur.view.node.nvals_at(r))
    }

    /// Whether the current pack has no spare capacity
    pub fn is_full(&self) -> bool {
        self.row_count() >= self.max_pack_rows
    }

    /// Min/max envelope of one table column in the current pack,
    /// loading the statistics columns on demand
    pub fn min_max(&mut self, field: usize) -> Result<Option<(Value, Value)>> {
        if self.row().is_none() {
            return Ok(None);
        }
        self.ensure_fields(&[field])?;
        let Some((cur, r)) = self.row() else {
            return Ok(None);
        };
        Ok(cur
            .view
            .value(min_col(field), r)
            .zip(cur.view.value(max_col(field), r)))
    }

    /// Sub-pack row interval from the on-disk positional range filter,
    /// when an integer predicate of the query can narrow the scan.
    /// None means scan the whole pack.
    pub fn scan_range(&mut self) -> Result<Option<ScanRange>> {
        let Some(filter) = self.filter.clone() else {
            return Ok(None);
        };
        // first mandatory condition on a range-filtered integer column
        // wins; a predicate inside an Or cannot narrow the scan, since
        // rows matched through a sibling branch fall outside its interval
        let mut pick: Option<Condition> = None;
        filter.for_each_required(&mut |c| {
            if pick.is_none() && self.schema.field(c.field).range {
                pick = Some(c.clone());
            }
        });
        let Some(cond) = pick else {
            return Ok(None);
        };
        self.ensure_fields(&[cond.field])?;
        let Some((cur, r)) = self.row() else {
            return Ok(None);
        };
        let key = cur.view.node.key_at(r);
        let ver = cur.view.node.version_at(r);
        let Some(min) = cur.view.value(min_col(cond.field), r) else {
            return Ok(None);
        };
        let n_rows = cur.view.node.nvals_at(r) as u32;
        let fid = self.schema.field(cond.field).id;

        let range_key = self.keys[STATS_RANGE_KEY].clone();
        self.db.view(|tx| {
            let Some(bucket) = tx.bucket(&[range_key.as_slice()]) else {
                return Ok(None);
            };
            let Some(buf) = bucket.get(&encode_filter_key(fid, key, ver)) else {
                return Ok(None);
            };
            let rf = RangeFilter::from_bytes(&buf)?;
            Ok(rf.query(&cond, &min, n_rows))
        })
    }

    /// Wire-encode the current statistics row
    pub fn read_row(&mut self) -> Result<Vec<u8>> {
        let all: Vec<usize> = (0..self.schema.num_stats_cols()).collect();
        self.ensure_positions(&all)?;
        let (cur, r) = self
            .row()
            .ok_or_else(|| Error::StorageCorrupt("read past iterator end".into()))?;
        cur.view.encode_row(&self.schema, r)
    }

    /// Load missing min/max columns for `fields` into the current
    /// leaf's overlay
    fn ensure_fields(&mut self, fields: &[usize]) -> Result<()> {
        let cols: Vec<usize> = fields
            .iter()
            .flat_map(|&f| [min_col(f), max_col(f)])
            .collect();
        self.ensure_positions(&cols)
    }

    fn ensure_positions(&mut self, cols: &[usize]) -> Result<()> {
        let Some(cur) = self.cur.as_mut() else {
            return Ok(());
        };
        let missing: Vec<usize> = cols
            .iter()
            .copied()
            .filter(|&pos| cur.view.col(pos).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let block_key = self.keys[STATS_BLOCK_KEY].clone();
        let schema = self.schema.clone();
        let db = self.db.clone();
        db.view(|tx| load_overlay(tx, &block_key, &schema, &mut cur.view, &missing))
    }

    /// Run the vectorized match over one candidate leaf
    fn match_leaf(&self, j: usize) -> Result<LeafMatch> {
        let node = self.snap.tree.snodes[j].clone();
        let len = node.n_packs();
        let mut view = LeafView::new(node);
        let bits = match &self.filter {
            None => Bitset::ones(len),
            Some(filter) => {
                let fields = filter.fields();
                let missing: Vec<usize> = fields
                    .iter()
                    .flat_map(|&f| [min_col(f), max_col(f)])
                    .filter(|&pos| view.col(pos).is_none())
                    .collect();
                self.db.view(|tx| {
                    if !missing.is_empty() {
                        load_overlay(
                            tx,
                            &self.keys[STATS_BLOCK_KEY],
                            &self.schema,
                            &mut view,
                            &missing,
                        )?;
                    }
                    self.match_vector(filter, &view, len, tx)
                })?
            }
        };
        let mut rows: Vec<usize> = bits.iter().collect();
        if self.order == SortOrder::Desc {
            rows.reverse();
        }
        Ok(LeafMatch { view, rows, pos: 0 })
    }

    fn match_vector(
        &self,
        f: &Filter,
        view: &LeafView,
        len: usize,
        tx: &dyn ReadTx,
    ) -> Result<Bitset> {
        match f {
            Filter::And(children) => {
                let mut bits = Bitset::ones(len);
                for c in children {
                    let b = self.match_vector(c, view, len, tx)?;
                    bits.and(&b);
                    if bits.none() {
                        break;
                    }
                }
                Ok(bits)
            }
            Filter::Or(children) => {
                let mut bits = Bitset::new(len);
                for c in children {
                    let b = self.match_vector(c, view, len, tx)?;
                    bits.or(&b);
                    if bits.count() == len {
                        break;
                    }
                }
                Ok(bits)
            }
            Filter::Cond(cond) => self.cond_vector(cond, view, len, tx),
        }
    }

    fn cond_vector(
        &self,
        cond: &Condition,
        view: &LeafView,
        len: usize,
        tx: &dyn ReadTx,
    ) -> Result<Bitset> {
        let mut bits = Bitset::new(len);
        let (minc, maxc) = (view.col(min_col(cond.field)), view.col(max_col(cond.field)));
        let (Some(minc), Some(maxc)) = (minc, maxc) else {
            // unloaded column cannot prune
            return Ok(Bitset::ones(len));
        };
        for row in 0..len {
            if cond.match_range(&minc.get(row), &maxc.get(row)) {
                bits.set(row);
            }
        }

        // membership filters veto Eq/In probes on declared columns
        let kind = self.schema.field(cond.field).filter;
        if !cond.mode.uses_membership_filter() || kind.is_none() || bits.none() {
            return Ok(bits);
        }
        let Some(bucket) = tx.bucket(&[self.keys[STATS_FILTER_KEY].as_slice()]) else {
            return Ok(bits);
        };
        let fid = self.schema.field(cond.field).id;
        let hits: Vec<usize> = bits.iter().collect();
        for row in hits {
            let key = view.node.key_at(row);
            let ver = view.node.version_at(row);
            let Some(buf) = bucket.get(&encode_filter_key(fid, key, ver)) else {
                continue;
            };
            // decode problems keep the record
            if probe_filter(kind, &buf, cond) == Some(false) {
                bits.unset(row);
            }
        }
        Ok(bits)
    }
}

fn load_overlay(
    tx: &dyn ReadTx,
    block_key: &[u8],
    schema: &Schema,
    view: &mut LeafView,
    cols: &[usize],
) -> Result<()> {
    let Some(bucket) = tx.bucket(&[block_key]) else {
        return Err(Error::BucketNotFound("stats blocks".into()));
    };
    let types = schema.stats_types();
    for &pos in cols {
        let bkey = encode_block_key(view.node.key(), view.node.version(), pos as u16);
        let buf = bucket.get(&bkey).ok_or_else(|| {
            Error::StorageCorrupt(format!(
                "missing block {pos} of stats pack {}",
                view.node.key()
            ))
        })?;
        view.extra.insert(pos, ColumnVec::decode(types[pos], &buf)?);
    }
    Ok(())
}

/// Probe a persisted membership filter. Some(false) means the value is
/// definitely absent; None means the probe was inconclusive.
fn probe_filter(kind: FilterKind, buf: &[u8], cond: &Condition) -> Option<bool> {
    let probe_one = |val: &Value| -> Option<bool> {
        match kind {
            FilterKind::Bloom(_) => Some(BloomFilter::from_bytes(buf).ok()?.contains(val)),
            FilterKind::Fuse => Some(FuseFilter::from_bytes(buf).ok()?.contains(val)),
            FilterKind::Bits => Some(BitsFilter::from_bytes(buf).ok()?.contains(val)),
            FilterKind::None => None,
        }
    };
    match &cond.value {
        CondValue::One(v) => probe_one(v),
        CondValue::Set(set) => {
            for v in set {
                match probe_one(v) {
                    Some(true) => return Some(true),
                    Some(false) => {}
                    None => return None,
                }
            }
            Some(false)
        }
        CondValue::Span(_, _) => None,
    }
}

impl<B: Backend + 'static> StatsIndex<B> {
    /// Run a query against the current published snapshot. The returned
    /// iterator pins the snapshot until dropped.
    pub fn query(&self, filter: Option<Filter>, order: SortOrder) -> QueryIterator<B> {
        let snap = self.cell.get();
        let mut candidates = find_candidates(&snap.tree, filter.as_ref(), &self.schema);
        if order == SortOrder::Desc {
            candidates.reverse();
        }
        QueryIterator {
            snap,
            db: self.db.clone(),
            schema: self.schema.clone(),
            keys: self.keys.clone(),
            filter,
            order,
            cancel: CancelToken::default(),
            max_pack_rows: self.max_pack_rows,
            candidates,
            next_leaf: 0,
            cur: None,
        }
    }

    /// Locate the pack that should hold row id `rid`, for merge
    /// placement. Appends are the common case, so a row id beyond the
    /// global maximum resolves directly to the last pack without a
    /// tree descent.
    pub fn find_rid(&self, rid: u64) -> Result<Option<PackPlacement>> {
        let snap = self.cell.get();
        if snap.tree.num_leaves() == 0 {
            snap.release();
            return Ok(None);
        }
        let global_max = snap
            .tree
            .root_meta()
            .and_then(|m| m.get(max_col(self.schema.rid_col())))
            .map_or(0, |v| v.as_u64());
        if rid > global_max {
            if let Some(node) = snap.tree.snodes.last() {
                let (key, _, n_values) = node.last_info();
                let place = PackPlacement {
                    key,
                    n_values,
                    is_full: n_values >= self.max_pack_rows,
                };
                snap.release();
                return Ok(Some(place));
            }
        }
        snap.release();

        let cond = Condition::eq(self.schema.rid_col(), Value::U64(rid));
        let mut it = self.query(Some(Filter::Cond(cond)), SortOrder::Asc);
        if !it.next()? {
            return Ok(None);
        }
        Ok(Some(PackPlacement {
            key: it.key(),
            n_values: it.row_count(),
            is_full: it.is_full(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{ColumnStats, PackStats};
    use crate::schema::Field;
    use crate::store::memory::MemBackend;
    use crate::types::{FilterMode, ValueType};

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            "acct",
            vec![
                Field::new(0, "rid", ValueType::U64).with_range(),
                Field::new(1, "owner", ValueType::U32).with_filter(FilterKind::Bits),
                Field::new(2, "balance", ValueType::I64),
            ],
            0,
        ))
    }

    fn pack(key: u32, rid: (u64, u64), owners: &[u32]) -> PackStats {
        let omin = owners.iter().min().copied().unwrap_or(0);
        let omax = owners.iter().max().copied().unwrap_or(0);
        PackStats {
            key,
            version: 1,
            schema_id: 7,
            n_values: rid.1 - rid.0 + 1,
            disk_size: 512,
            columns: vec![
                ColumnStats::new(Value::U64(rid.0), Value::U64(rid.1)),
                ColumnStats::new(Value::U32(omin), Value::U32(omax))
                    .with_cardinality(owners.len() as u32)
                    .with_values(ColumnVec::U32(owners.to_vec())),
                ColumnStats::new(Value::I64(-(key as i64)), Value::I64(key as i64)),
            ],
        }
    }

    /// Three packs with disjoint row id ranges, stored and published
    fn built() -> StatsIndex<MemBackend> {
        let mut idx = StatsIndex::new(Arc::new(MemBackend::new()), schema(), 150);
        idx.add(&pack(1, (1, 100), &[10, 20, 30])).unwrap();
        idx.add(&pack(2, (101, 200), &[40, 50])).unwrap();
        idx.add(&pack(3, (201, 300), &[10, 60])).unwrap();
        idx.store().unwrap();
        idx
    }

    fn collect(idx: &StatsIndex<MemBackend>, f: Option<Filter>, order: SortOrder) -> Vec<u32> {
        let mut it = idx.query(f, order);
        let mut keys = Vec::new();
        while it.next().unwrap() {
            keys.push(it.key());
        }
        keys
    }

    fn rid_range(lo: u64, hi: u64) -> Filter {
        Filter::Cond(Condition::new(
            0,
            FilterMode::Range,
            CondValue::Span(Value::U64(lo), Value::U64(hi)),
        ))
    }

    #[test]
    fn test_full_scan_both_orders() {
        let idx = built();
        assert_eq!(collect(&idx, None, SortOrder::Asc), vec![1, 2, 3]);
        assert_eq!(collect(&idx, None, SortOrder::Desc), vec![3, 2, 1]);
    }

    #[test]
    fn test_range_pruning() {
        let idx = built();
        assert_eq!(collect(&idx, Some(rid_range(150, 160)), SortOrder::Asc), vec![2]);
        assert_eq!(
            collect(&idx, Some(rid_range(90, 110)), SortOrder::Asc),
            vec![1, 2]
        );
        assert_eq!(collect(&idx, Some(rid_range(500, 600)), SortOrder::Asc), Vec::<u32>::new());
        assert_eq!(
            collect(
                &idx,
                Some(Filter::Cond(Condition::eq(0, Value::U64(250)))),
                SortOrder::Asc
            ),
            vec![3]
        );
    }

    #[test]
    fn test_membership_veto() {
        let idx = built();
        // 15 sits inside the [10, 30] and [10, 60] envelopes, but the
        // exact bitmap filters prove it absent everywhere
        let eq15 = Filter::Cond(Condition::eq(1, Value::U32(15)));
        assert_eq!(collect(&idx, Some(eq15), SortOrder::Asc), Vec::<u32>::new());

        // 50 survives only where the filter confirms it
        let eq50 = Filter::Cond(Condition::eq(1, Value::U32(50)));
        assert_eq!(collect(&idx, Some(eq50), SortOrder::Asc), vec![2]);
    }

    #[test]
    fn test_in_set_probe() {
        let idx = built();
        let f = Filter::Cond(Condition::new(
            1,
            FilterMode::In,
            CondValue::Set(vec![Value::U32(15), Value::U32(60)]),
        ));
        assert_eq!(collect(&idx, Some(f), SortOrder::Asc), vec![3]);
    }

    #[test]
    fn test_and_or_combinators() {
        let idx = built();
        let f = Filter::And(vec![
            rid_range(1, 300),
            Filter::Or(vec![
                Filter::Cond(Condition::eq(1, Value::U32(20))),
                Filter::Cond(Condition::eq(1, Value::U32(40))),
            ]),
        ]);
        assert_eq!(collect(&idx, Some(f), SortOrder::Asc), vec![1, 2]);
    }

    #[test]
    fn test_min_max_and_read_row() {
        let idx = built();
        let mut it = idx.query(Some(rid_range(150, 160)), SortOrder::Asc);
        assert!(it.next().unwrap());
        assert_eq!(it.key(), 2);
        assert_eq!(it.row_count(), 100);
        assert_eq!(
            it.min_max(2).unwrap(),
            Some((Value::I64(-2), Value::I64(2)))
        );
        assert!(!it.read_row().unwrap().is_empty());
        assert!(!it.next().unwrap());
    }

    #[test]
    fn test_cancel() {
        let idx = built();
        let mut it = idx.query(None, SortOrder::Asc);
        it.cancel_token().cancel();
        assert!(matches!(it.next(), Err(Error::Canceled)));
    }

    #[test]
    fn test_scan_range_narrows_pack() {
        let mut idx = StatsIndex::new(Arc::new(MemBackend::new()), schema(), 150);
        let mut p = pack(1, (1, 100), &[10]);
        p.columns[0].values = Some(ColumnVec::U64((1..=100).collect()));
        idx.add(&p).unwrap();
        idx.store().unwrap();

        let mut it = idx.query(
            Some(Filter::Cond(Condition::eq(0, Value::U64(50)))),
            SortOrder::Asc,
        );
        assert!(it.next().unwrap());
        // value 50 was observed only at row 49
        assert_eq!(it.scan_range().unwrap(), Some(ScanRange::new(49, 50)));
    }

    #[test]
    fn test_scan_range_skips_optional_branches() {
        let mut idx = StatsIndex::new(Arc::new(MemBackend::new()), schema(), 150);
        let mut p = pack(1, (1, 100), &[7]);
        p.columns[0].values = Some(ColumnVec::U64((1..=100).collect()));
        idx.add(&p).unwrap();
        idx.store().unwrap();

        // the pack matches through the owner branch, so the rid branch
        // must not narrow the scan: rows outside 4..5 still qualify
        let f = Filter::Or(vec![
            Filter::Cond(Condition::eq(1, Value::U32(7))),
            Filter::Cond(Condition::eq(0, Value::U64(5))),
        ]);
        let mut it = idx.query(Some(f), SortOrder::Asc);
        assert!(it.next().unwrap());
        assert_eq!(it.scan_range().unwrap(), None);

        // under a conjunction the rid predicate is mandatory and narrows
        let f = Filter::And(vec![
            Filter::Cond(Condition::eq(1, Value::U32(7))),
            Filter::Cond(Condition::eq(0, Value::U64(5))),
        ]);
        let mut it = idx.query(Some(f), SortOrder::Asc);
        assert!(it.next().unwrap());
        assert_eq!(it.scan_range().unwrap(), Some(ScanRange::new(4, 5)));
    }

    #[test]
    fn test_find_rid() {
        let idx = built();
        // past the global max: resolve to the last pack without descent
        assert_eq!(
            idx.find_rid(999).unwrap(),
            Some(PackPlacement {
                key: 3,
                n_values: 100,
                is_full: false,
            })
        );
        let hit = idx.find_rid(150).unwrap().unwrap();
        assert_eq!(hit.key, 2);
        assert_eq!(hit.n_values, 100);

        let empty = StatsIndex::new(Arc::new(MemBackend::new()), schema(), 150);
        assert_eq!(empty.find_rid(1).unwrap(), None);
    }

    #[test]
    fn test_query_after_reload() {
        let idx = built();
        let mut back = StatsIndex::new(idx.db.clone(), schema(), 150).with_epoch(1);
        back.open().unwrap();
        assert_eq!(collect(&back, Some(rid_range(90, 110)), SortOrder::Asc), vec![1, 2]);
        let eq50 = Filter::Cond(Condition::eq(1, Value::U32(50)));
        assert_eq!(collect(&back, Some(eq50), SortOrder::Asc), vec![2]);
    }
}
