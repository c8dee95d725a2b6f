//! Statistics index: mutation entry points and filter construction
//!
//! One writer (the merge process) mutates a private tree and publishes
//! immutable snapshots for readers. Add/Update/Delete keep the tree and
//! the per-pack filters in sync with the merge engine's pack
//! descriptors; persistence and garbage collection live in
//! [`persist`](crate::persist) and [`gc`](crate::gc).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::encoding::keys::{encode_filter_key, make_bucket_names, STATS_BUCKETS};
use crate::error::{Error, Result};
use crate::gc::GcFields;
use crate::filter::bits::BitsFilter;
use crate::filter::bloom::BloomFilter;
use crate::filter::fuse::FuseFilter;
use crate::filter::range::RangeFilter;
use crate::pack::PackStats;
use crate::schema::{FilterKind, Schema};
use crate::snapshot::{Snapshot, SnapshotCell};
use crate::store::Backend;
use crate::tree::snode::SNode;
use crate::tree::Tree;
use crate::types::{max_col, min_col, STATS_ROW_KEY, STATS_ROW_NVALS, STATS_ROW_SIZE};

/// The statistics index for one table
pub struct StatsIndex<B: Backend> {
    pub(crate) db: Arc<B>,
    pub(crate) schema: Arc<Schema>,
    pub(crate) keys: [Vec<u8>; STATS_BUCKETS],
    /// Current merge epoch, ticked by the caller per journal segment
    pub(crate) epoch: u32,
    /// Writer-private tree, published as a snapshot on store
    pub(crate) tree: Tree,
    pub(crate) cell: SnapshotCell,
    pub(crate) clean: bool,
    /// Data pack capacity, for spare-capacity checks on placement
    pub(crate) max_pack_rows: u64,
    /// Replaced table pack versions queued for tombstoning at the next
    /// persistence pass
    pub(crate) pack_tombs: Vec<(u32, u32)>,
    pub(crate) gc_fields: GcFields,
    pub(crate) bytes_read: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
}

impl<B: Backend + 'static> StatsIndex<B> {
    pub fn new(db: Arc<B>, schema: Arc<Schema>, max_pack_rows: u64) -> Self {
        let keys = make_bucket_names(schema.name());
        let gc_fields = GcFields::new(&schema);
        Self {
            db,
            schema,
            keys,
            epoch: 1,
            tree: Tree::new(),
            cell: SnapshotCell::new(Arc::new(Snapshot::new(Tree::new(), 0))),
            clean: true,
            max_pack_rows,
            pack_tombs: Vec::new(),
            gc_fields,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Set the merge epoch before load or store. Epochs come from the
    /// merge layer, one per journal segment.
    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Number of live Records
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Total table rows across all live Records
    pub fn count(&self) -> u64 {
        self.tree.count()
    }

    /// Smallest row id across all live Records, from the root aggregate
    pub fn global_min_rid(&self) -> u64 {
        self.tree
            .root_meta()
            .map_or(0, |m| m[min_col(self.schema.rid_col())].as_u64())
    }

    /// Largest row id across all live Records
    pub fn global_max_rid(&self) -> u64 {
        self.tree
            .root_meta()
            .map_or(0, |m| m[max_col(self.schema.rid_col())].as_u64())
    }

    /// Total on-disk size of all live data packs
    pub fn table_size(&self) -> u64 {
        self.tree
            .root_meta()
            .map_or(0, |m| m[STATS_ROW_SIZE].as_u64())
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Retain and return the currently published snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.cell.get()
    }

    /// Register a new pack. Places the Record into the covering leaf or
    /// allocates a new one, then refreshes aggregates and filters.
    pub fn add(&mut self, pack: &PackStats) -> Result<()> {
        let j = match self.tree.find_placement(pack.key) {
            Some(j) if self.tree.snodes[j].has_space() => j,
            _ => self.tree.append_leaf(&self.schema),
        };
        self.materialize(j)?;
        let schema = self.schema.clone();
        self.tree.append_to_leaf(j, pack, &schema);
        self.build_filters(pack)
    }

    /// Refresh the Record of a mutated pack in place
    pub fn update(&mut self, pack: &PackStats) -> Result<()> {
        let j = self
            .tree
            .find_owner(pack.key)
            .ok_or(Error::MissingRecord(pack.key))?;
        self.materialize(j)?;
        let schema = self.schema.clone();
        let node = self.tree.leaf_mut(j);
        let old_ver = node.find_key(pack.key).map(|k| node.version_at(k));
        let changed = node.update_record(pack)?;
        if changed && node.build_meta(&schema) {
            self.tree.propagate(j);
        }
        if let Some(v) = old_ver {
            if v != pack.version {
                self.pack_tombs.push((pack.key, v));
            }
        }
        if pack.any_dirty() {
            self.build_filters(pack)?;
        }
        Ok(())
    }

    /// Remove the Record of an emptied pack. A leaf emptied by this
    /// stays in place until the next persistence pass removes it and
    /// rebuilds the inner tree.
    pub fn delete(&mut self, key: u32) -> Result<()> {
        let j = self.tree.find_owner(key).ok_or(Error::MissingRecord(key))?;
        self.materialize(j)?;
        let schema = self.schema.clone();
        let node = self.tree.leaf_mut(j);
        let old_ver = node.find_key(key).map(|k| node.version_at(k));
        node.delete_record(key)?;
        node.build_meta(&schema);
        self.tree.propagate(j);
        if let Some(v) = old_ver {
            self.pack_tombs.push((key, v));
        }
        Ok(())
    }

    /// Ensure leaf `j` is fully materialized before mutation: clone the
    /// shared node and load its missing columns, leaving the original
    /// untouched for concurrent readers.
    pub(crate) fn materialize(&mut self, j: usize) -> Result<()> {
        if self.tree.snodes[j].is_complete() {
            return Ok(());
        }
        let mut clone = (*self.tree.snodes[j]).clone();
        self.load_missing_cols(&mut clone)?;
        self.tree.snodes[j] = Arc::new(clone);
        Ok(())
    }

    pub(crate) fn load_missing_cols(&self, node: &mut SNode) -> Result<()> {
        let missing: Vec<usize> = (0..self.schema.num_stats_cols())
            .filter(|&i| node.col(i).is_none())
            .collect();
        let need_versions = node.pack_versions().is_none();
        if missing.is_empty() && !need_versions {
            return Ok(());
        }
        let types = self.schema.stats_types();
        let block_key = self.keys[crate::encoding::keys::STATS_BLOCK_KEY].clone();
        let mut n_bytes = 0usize;
        self.db.view(|tx| {
            let bucket = tx
                .bucket(&[block_key.as_slice()])
                .ok_or_else(|| Error::BucketNotFound(String::from_utf8_lossy(&block_key).into()))?;
            for &i in &missing {
                let key =
                    crate::encoding::keys::encode_block_key(node.key(), node.version(), i as u16);
                let buf = bucket.get(&key).ok_or_else(|| {
                    Error::StorageCorrupt(format!(
                        "missing block {i} of stats pack {}",
                        node.key()
                    ))
                })?;
                n_bytes += buf.len();
                node.set_col(i, crate::column::ColumnVec::decode(types[i], &buf)?);
            }
            if need_versions {
                let key = crate::encoding::keys::encode_block_key(
                    node.key(),
                    node.version(),
                    self.schema.version_field_id(),
                );
                let buf = bucket.get(&key).ok_or_else(|| {
                    Error::StorageCorrupt(format!(
                        "missing version block of stats pack {}",
                        node.key()
                    ))
                })?;
                n_bytes += buf.len();
                match crate::column::ColumnVec::decode(crate::types::ValueType::U32, &buf)? {
                    crate::column::ColumnVec::U32(v) => node.set_pack_versions(v),
                    _ => unreachable!(),
                }
            }
            Ok(())
        })?;
        self.bytes_read.fetch_add(n_bytes as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Build and persist the probabilistic and range filters for every
    /// dirty column of a pack that declares one
    pub fn build_filters(&self, pack: &PackStats) -> Result<()> {
        let mut filters: Vec<(usize, Vec<u8>)> = Vec::new();
        let mut ranges: Vec<(usize, Vec<u8>)> = Vec::new();

        for (i, field) in self.schema.fields().iter().enumerate() {
            let col = match pack.columns.get(i) {
                Some(c) if c.dirty => c,
                _ => continue,
            };
            let values = match &col.values {
                Some(v) => v,
                None => continue,
            };

            match field.filter {
                FilterKind::Bloom(factor) => {
                    if let Some(f) = BloomFilter::build(values, col.cardinality, factor) {
                        filters.push((i, f.to_bytes()));
                    }
                }
                FilterKind::Fuse => {
                    let f = FuseFilter::build(values)?;
                    filters.push((i, f.to_bytes()?));
                }
                FilterKind::Bits => {
                    if BitsFilter::worthwhile(&col.min, &col.max, col.cardinality) {
                        if let Some(f) = BitsFilter::build(values, col.cardinality) {
                            filters.push((i, f.to_bytes()?));
                        }
                    }
                }
                FilterKind::None => {}
            }

            if field.range && field.typ.is_int() {
                let f = RangeFilter::build(values, &col.min, &col.max)?;
                ranges.push((i, f.to_bytes()));
            }
        }

        if filters.is_empty() && ranges.is_empty() {
            return Ok(());
        }

        let mut n_bytes = 0usize;
        self.db.update(|tx| {
            for name in &self.keys {
                tx.create_bucket(&[name.as_slice()])?;
            }
            for (bucket_id, built) in [
                (crate::encoding::keys::STATS_FILTER_KEY, &filters),
                (crate::encoding::keys::STATS_RANGE_KEY, &ranges),
            ] {
                if built.is_empty() {
                    continue;
                }
                let name = self.keys[bucket_id].clone();
                let mut bucket = tx
                    .bucket_mut(&[name.as_slice()])
                    .ok_or_else(|| Error::BucketNotFound(String::from_utf8_lossy(&name).into()))?;
                for (field_idx, buf) in built {
                    let fid = self.schema.field(*field_idx).id;
                    let key = encode_filter_key(fid, pack.key, pack.version);
                    bucket.put(&key, buf)?;
                    n_bytes += buf.len();
                }
            }
            Ok(())
        })?;
        self.bytes_written
            .fetch_add(n_bytes as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Record min/max for one field, from the leaf that owns `key`
    pub fn record_min_max(&self, key: u32, field: usize) -> Option<(crate::types::Value, crate::types::Value)> {
        let j = self.tree.find_owner(key)?;
        let node = &self.tree.snodes[j];
        let i = node.find_key(key)?;
        let min = node.col(min_col(field))?.get(i);
        let max = node.col(max_col(field))?.get(i);
        Some((min, max))
    }

    /// Row count of the Record for `key`
    pub fn record_rows(&self, key: u32) -> Option<u64> {
        let j = self.tree.find_owner(key)?;
        let node = &self.tree.snodes[j];
        let i = node.find_key(key)?;
        node.col(STATS_ROW_NVALS).map(|c| c.get(i).as_u64())
    }

    /// Next free data pack key, one past the highest registered
    pub fn next_pack_key(&self) -> u32 {
        self.tree
            .snodes
            .iter()
            .filter_map(|n| match n.col(STATS_ROW_KEY) {
                Some(crate::column::ColumnVec::U32(v)) => v.last().copied(),
                _ => None,
            })
            .max()
            .map_or(0, |k| k + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnVec;
    use crate::encoding::keys::STATS_FILTER_KEY;
    use crate::pack::ColumnStats;
    use crate::schema::Field;
    use crate::store::memory::MemBackend;
    use crate::types::{Value, ValueType};

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            "acct",
            vec![
                Field::new(0, "rid", ValueType::U64).with_range(),
                Field::new(1, "owner", ValueType::U32).with_filter(FilterKind::Bloom(2)),
                Field::new(2, "balance", ValueType::I64),
            ],
            0,
        ))
    }

    fn pack(key: u32, version: u32, rid: (u64, u64), owners: &[u32]) -> PackStats {
        let omin = owners.iter().min().copied().unwrap_or(0);
        let omax = owners.iter().max().copied().unwrap_or(0);
        PackStats {
            key,
            version,
            schema_id: 7,
            n_values: rid.1 - rid.0 + 1,
            disk_size: 512,
            columns: vec![
                ColumnStats::new(Value::U64(rid.0), Value::U64(rid.1)),
                ColumnStats::new(Value::U32(omin), Value::U32(omax))
                    .with_cardinality(owners.len() as u32)
                    .with_values(ColumnVec::U32(owners.to_vec())),
                ColumnStats::new(Value::I64(-100), Value::I64(100)),
            ],
        }
    }

    fn index() -> StatsIndex<MemBackend> {
        StatsIndex::new(Arc::new(MemBackend::new()), schema(), 1 << 16)
    }

    #[test]
    fn test_add_and_lookup() {
        let mut idx = index();
        idx.add(&pack(1, 1, (1, 100), &[10, 20])).unwrap();
        idx.add(&pack(2, 1, (101, 200), &[30])).unwrap();
        idx.add(&pack(3, 1, (201, 250), &[40])).unwrap();

        assert_eq!(idx.len(), 3);
        assert_eq!(idx.count(), 250);
        assert_eq!(idx.next_pack_key(), 4);
        assert_eq!(idx.global_min_rid(), 1);
        assert_eq!(idx.global_max_rid(), 250);
        assert_eq!(idx.table_size(), 3 * 512);
        assert_eq!(idx.record_rows(2), Some(100));
        assert_eq!(
            idx.record_min_max(2, 0),
            Some((Value::U64(101), Value::U64(200)))
        );
        assert_eq!(idx.record_rows(9), None);
    }

    #[test]
    fn test_update_queues_replaced_version() {
        let mut idx = index();
        idx.add(&pack(1, 1, (1, 100), &[10])).unwrap();
        idx.update(&pack(1, 2, (1, 150), &[10, 11])).unwrap();

        assert_eq!(idx.len(), 1);
        assert_eq!(idx.count(), 150);
        assert_eq!(
            idx.record_min_max(1, 0),
            Some((Value::U64(1), Value::U64(150)))
        );
        // the replaced pack version waits for the next persistence pass
        assert_eq!(idx.pack_tombs, vec![(1, 1)]);

        // same version again leaves nothing to tombstone
        idx.update(&pack(1, 2, (1, 150), &[10, 11])).unwrap();
        assert_eq!(idx.pack_tombs, vec![(1, 1)]);
    }

    #[test]
    fn test_update_missing_key() {
        let mut idx = index();
        idx.add(&pack(1, 1, (1, 100), &[10])).unwrap();
        let err = idx.update(&pack(5, 1, (1, 10), &[1])).unwrap_err();
        assert!(matches!(err, Error::MissingRecord(5)));
        assert!(matches!(idx.delete(5), Err(Error::MissingRecord(5))));
    }

    #[test]
    fn test_materialize_missing_block_is_corrupt() {
        let db = Arc::new(MemBackend::new());
        let mut idx = StatsIndex::new(db.clone(), schema(), 1 << 16);
        for k in 1..=3u32 {
            idx.add(&pack(k, 1, (k as u64 * 100, k as u64 * 100 + 99), &[10]))
                .unwrap();
        }
        idx.store().unwrap();

        // wipe a lazily loaded column block behind the index's back
        let node_key = idx.tree.snodes[0].key();
        let node_ver = idx.tree.snodes[0].version();
        let bkey = crate::encoding::keys::encode_block_key(
            node_key,
            node_ver,
            crate::types::min_col(1) as u16,
        );
        let name = idx.keys[crate::encoding::keys::STATS_BLOCK_KEY].clone();
        db.update(|tx| {
            tx.bucket_mut(&[name.as_slice()])
                .expect("block bucket")
                .delete(&bkey)
        })
        .unwrap();

        // mutating the shell leaf must report the hole, not shrink the
        // column to zero rows
        let mut back = StatsIndex::new(db, schema(), 1 << 16).with_epoch(1);
        back.open().unwrap();
        let err = back.update(&pack(2, 2, (200, 299), &[10, 11])).unwrap_err();
        assert!(matches!(err, Error::StorageCorrupt(_)));
    }

    #[test]
    fn test_delete_removes_record() {
        let mut idx = index();
        idx.add(&pack(1, 1, (1, 100), &[10])).unwrap();
        idx.add(&pack(2, 1, (101, 200), &[20])).unwrap();
        idx.delete(1).unwrap();

        assert_eq!(idx.len(), 1);
        assert_eq!(idx.count(), 100);
        assert_eq!(idx.record_rows(1), None);
        assert_eq!(idx.pack_tombs, vec![(1, 1)]);
    }

    #[test]
    fn test_filters_persisted_on_add() {
        let idx = {
            let mut idx = index();
            idx.add(&pack(1, 3, (1, 100), &[10, 20, 30])).unwrap();
            idx
        };
        // bloom for the owner column lands under (field id, pack, version)
        let fkey = encode_filter_key(1, 1, 3);
        let name = idx.keys[STATS_FILTER_KEY].clone();
        idx.db
            .view(|tx| {
                let b = tx.bucket(&[name.as_slice()]).expect("filter bucket");
                assert!(b.get(&fkey).is_some());
                Ok(())
            })
            .unwrap();
        assert!(idx.bytes_written() > 0);
    }
}
