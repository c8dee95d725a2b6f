//! Epoch-based garbage collection
//!
//! On-disk data is copy-on-write and versioned. Every persistence pass
//! runs under one epoch and records the keys it replaced as tombstones
//! under the predecessor epoch. A reader pins the epoch of the snapshot
//! it retained, so a tombstoned key stays on disk until no live epoch
//! can still reference it.
//!
//! The watermark is the lowest epoch still in use. Tombstone buckets of
//! any earlier epoch are reclaimable as a whole. Retiring a snapshot
//! removes its epoch from the live set and sweeps what became
//! collectable.

use crate::encoding::keys::{
    decode_epoch_key, decode_pack_tomb_key, encode_block_key, encode_epoch_key, encode_filter_key,
    STATS_BLOCK_KEY, STATS_BUCKETS, STATS_EPOCH_KEY, STATS_FILTER_KEY, STATS_RANGE_KEY,
    STATS_TOMB_KEY, STATS_TREE_KEY, TOMB_KIND_STATS_PACK, TOMB_KIND_TABLE_PACK,
    TOMB_KIND_TREE_NODE,
};
use crate::error::{Error, Result};
use crate::index::StatsIndex;
use crate::schema::{FilterKind, Schema};
use crate::store::{Backend, Direction, ReadTx, WriteTx};

/// Field id lists resolved from the schema once, used to expand pack
/// tombstones into the block and filter keys they cover
#[derive(Debug, Clone)]
pub(crate) struct GcFields {
    /// Table fields carrying a membership filter
    pub filtered: Vec<u16>,
    /// Table fields carrying a range filter
    pub ranged: Vec<u16>,
    /// Statistics block ids per spack, including the version block
    pub n_spack_blocks: u16,
}

impl GcFields {
    pub fn new(schema: &Schema) -> Self {
        let filtered = schema
            .fields()
            .iter()
            .filter(|f| !matches!(f.filter, FilterKind::None))
            .map(|f| f.id)
            .collect();
        let ranged = schema
            .fields()
            .iter()
            .filter(|f| f.range && f.typ.is_int())
            .map(|f| f.id)
            .collect();
        Self {
            filtered,
            ranged,
            n_spack_blocks: schema.version_field_id() + 1,
        }
    }
}

/// True when the live epoch set contains anything besides `epoch`,
/// i.e. a crash left stale epochs behind
pub(crate) fn need_cleanup_tx(tx: &dyn ReadTx, keys: &[Vec<u8>; STATS_BUCKETS], epoch: u32) -> bool {
    match tx.bucket(&[keys[STATS_EPOCH_KEY].as_slice()]) {
        Some(b) => b
            .iter(Direction::Forward)
            .any(|(k, _)| decode_epoch_key(&k).map_or(true, |e| e != epoch)),
        None => false,
    }
}

/// Lowest epoch still in use, capped at `cap`
fn watermark_tx(tx: &dyn WriteTx, keys: &[Vec<u8>; STATS_BUCKETS], cap: u32) -> u32 {
    let live = tx
        .bucket(&[keys[STATS_EPOCH_KEY].as_slice()])
        .and_then(|b| {
            b.iter(Direction::Forward)
                .next()
                .and_then(|(k, _)| decode_epoch_key(&k).ok())
        });
    live.map_or(cap, |e| e.min(cap))
}

/// Drop all tombstone buckets below the watermark
pub(crate) fn run_gc_tx(
    tx: &mut dyn WriteTx,
    keys: &[Vec<u8>; STATS_BUCKETS],
    fields: &GcFields,
    cap: u32,
) -> Result<()> {
    let watermark = watermark_tx(tx, keys, cap);
    let drop: Vec<u32> = match tx.bucket(&[keys[STATS_TOMB_KEY].as_slice()]) {
        Some(b) => b
            .sub_names()
            .iter()
            .filter_map(|n| decode_epoch_key(n).ok())
            .take_while(|&e| e < watermark)
            .collect(),
        None => return Ok(()),
    };
    for epoch in drop {
        gc_epoch_tx(tx, keys, fields, epoch)?;
    }
    Ok(())
}

/// Reclaim everything tombstoned under one epoch, then drop its bucket
pub(crate) fn gc_epoch_tx(
    tx: &mut dyn WriteTx,
    keys: &[Vec<u8>; STATS_BUCKETS],
    fields: &GcFields,
    epoch: u32,
) -> Result<()> {
    let ekey = encode_epoch_key(epoch);
    let tomb = keys[STATS_TOMB_KEY].as_slice();

    let collect = |tx: &mut dyn WriteTx, kind: u8| -> Vec<(u32, u32)> {
        match tx.bucket(&[tomb, ekey.as_slice(), &[kind]]) {
            Some(b) => b
                .iter(Direction::Forward)
                .filter_map(|(k, _)| decode_pack_tomb_key(&k).ok())
                .collect(),
            None => Vec::new(),
        }
    };

    let mut n_filters = 0usize;
    let mut n_blocks = 0usize;
    let mut n_nodes = 0usize;

    // replaced table packs: their filters and range filters expire
    let packs = collect(tx, TOMB_KIND_TABLE_PACK);
    if !packs.is_empty() {
        for (bucket_id, ids) in [
            (STATS_FILTER_KEY, &fields.filtered),
            (STATS_RANGE_KEY, &fields.ranged),
        ] {
            let Some(mut b) = tx.bucket_mut(&[keys[bucket_id].as_slice()]) else {
                continue;
            };
            for &(pk, pv) in &packs {
                for &id in ids {
                    b.delete(&encode_filter_key(id, pk, pv))?;
                    n_filters += 1;
                }
            }
        }
    }

    // replaced statistics packs: drop every column block
    let spacks = collect(tx, TOMB_KIND_STATS_PACK);
    if !spacks.is_empty() {
        let mut b = tx
            .bucket_mut(&[keys[STATS_BLOCK_KEY].as_slice()])
            .ok_or_else(|| Error::BucketNotFound("stats blocks".into()))?;
        for (pk, pv) in spacks {
            for id in 0..fields.n_spack_blocks {
                b.delete(&encode_block_key(pk, pv, id))?;
                n_blocks += 1;
            }
        }
    }

    // replaced tree nodes: tombstone keys are full node keys
    let node_keys: Vec<Vec<u8>> = match tx.bucket(&[tomb, ekey.as_slice(), &[TOMB_KIND_TREE_NODE]])
    {
        Some(b) => b.iter(Direction::Forward).map(|(k, _)| k).collect(),
        None => Vec::new(),
    };
    if !node_keys.is_empty() {
        let mut b = tx
            .bucket_mut(&[keys[STATS_TREE_KEY].as_slice()])
            .ok_or_else(|| Error::BucketNotFound("stats tree".into()))?;
        for k in node_keys {
            b.delete(&k)?;
            n_nodes += 1;
        }
    }

    log::debug!(
        "stats gc: epoch {epoch} reclaimed filters={n_filters} blocks={n_blocks} nodes={n_nodes}"
    );

    tx.delete_bucket(&[tomb, ekey.as_slice()])
}

/// Remove one epoch from the live set and sweep what became
/// collectable. Runs when the last reader of a snapshot finishes.
pub(crate) fn retire_epoch_tx(
    tx: &mut dyn WriteTx,
    keys: &[Vec<u8>; STATS_BUCKETS],
    fields: &GcFields,
    epoch: u32,
) -> Result<()> {
    if let Some(mut b) = tx.bucket_mut(&[keys[STATS_EPOCH_KEY].as_slice()]) {
        b.delete(&encode_epoch_key(epoch))?;
    }
    // every snapshot at or below this epoch is gone
    run_gc_tx(tx, keys, fields, epoch.wrapping_add(1))
}

impl<B: Backend + 'static> StatsIndex<B> {
    /// Sweep all reclaimable tombstone epochs
    pub fn run_gc(&self) -> Result<()> {
        let db = self.db.clone();
        db.update(|tx| run_gc_tx(tx, &self.keys, &self.gc_fields, self.epoch))
    }

    /// True when stale or future epochs exist on disk and
    /// [`cleanup_epochs`](Self::cleanup_epochs) should run
    pub fn need_cleanup(&self) -> Result<bool> {
        let db = self.db.clone();
        db.view(|tx| Ok(need_cleanup_tx(tx, &self.keys, self.epoch)))
    }

    /// Startup recovery: drop every live epoch except the current one,
    /// reclaim tombstones of broken future epochs, then run regular GC
    pub fn cleanup_epochs(&mut self) -> Result<()> {
        let db = self.db.clone();
        db.update(|tx| {
            let stale: Vec<u32> = match tx.bucket(&[self.keys[STATS_EPOCH_KEY].as_slice()]) {
                Some(b) => b
                    .iter(Direction::Forward)
                    .filter_map(|(k, _)| decode_epoch_key(&k).ok())
                    .filter(|&e| e != self.epoch)
                    .collect(),
                None => Vec::new(),
            };
            log::debug!(
                "stats[{}]: cleanup {} epochs",
                self.schema.name(),
                stale.len()
            );
            for e in stale {
                if let Some(mut b) = tx.bucket_mut(&[self.keys[STATS_EPOCH_KEY].as_slice()]) {
                    b.delete(&encode_epoch_key(e))?;
                }
                // a future epoch means a crashed store; its tombstones
                // name keys the crashed pass replaced
                if e >= self.epoch {
                    log::debug!("stats[{}]: gc broken future epoch {e}", self.schema.name());
                    gc_epoch_tx(tx, &self.keys, &self.gc_fields, e)?;
                }
            }
            run_gc_tx(tx, &self.keys, &self.gc_fields, self.epoch)
        })?;
        self.clean = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::column::ColumnVec;
    use crate::index::StatsIndex;
    use crate::pack::{ColumnStats, PackStats};
    use crate::schema::Field;
    use crate::store::memory::MemBackend;
    use crate::types::{Value, ValueType};

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            "acct",
            vec![
                Field::new(0, "rid", ValueType::U64),
                Field::new(1, "owner", ValueType::U32).with_filter(FilterKind::Bloom(2)),
            ],
            0,
        ))
    }

    fn pack(key: u32, version: u32, rid: (u64, u64)) -> PackStats {
        PackStats {
            key,
            version,
            schema_id: 7,
            n_values: rid.1 - rid.0 + 1,
            disk_size: 256,
            columns: vec![
                ColumnStats::new(Value::U64(rid.0), Value::U64(rid.1)),
                ColumnStats::new(Value::U32(1), Value::U32(9))
                    .with_cardinality(3)
                    .with_values(ColumnVec::U32(vec![1, 5, 9])),
            ],
        }
    }

    fn has_key(db: &MemBackend, bucket: &[u8], key: &[u8]) -> bool {
        db.view(|tx| Ok(tx.bucket(&[bucket]).is_some_and(|b| b.get(key).is_some())))
            .unwrap()
    }

    #[test]
    fn test_pinned_snapshot_defers_collection() {
        let db = Arc::new(MemBackend::new());
        let mut idx = StatsIndex::new(db.clone(), schema(), 1 << 16);
        idx.add(&pack(1, 1, (1, 100))).unwrap();
        idx.store().unwrap();
        let old_filter = encode_filter_key(1, 1, 1);
        assert!(has_key(&db, &idx.keys[STATS_FILTER_KEY], &old_filter));

        // a reader pins the epoch 1 snapshot across the next store
        let pinned = idx.snapshot();
        idx.update(&pack(1, 2, (1, 200))).unwrap();
        idx.store().unwrap();

        // the replaced filter is tombstoned but still readable
        assert!(has_key(&db, &idx.keys[STATS_FILTER_KEY], &old_filter));
        db.view(|tx| {
            let tomb = tx
                .bucket(&[
                    idx.keys[STATS_TOMB_KEY].as_slice(),
                    encode_epoch_key(1).as_slice(),
                ])
                .expect("epoch 1 tombstones");
            assert!(!tomb.sub_names().is_empty());
            Ok(())
        })
        .unwrap();

        // releasing the last reader retires epoch 1 and sweeps
        pinned.release();
        assert!(!has_key(&db, &idx.keys[STATS_FILTER_KEY], &old_filter));
        let new_filter = encode_filter_key(1, 1, 2);
        assert!(has_key(&db, &idx.keys[STATS_FILTER_KEY], &new_filter));
        db.view(|tx| {
            assert!(tx
                .bucket(&[
                    idx.keys[STATS_TOMB_KEY].as_slice(),
                    encode_epoch_key(1).as_slice(),
                ])
                .is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_pinned_snapshot_survives_updates() {
        let db = Arc::new(MemBackend::new());
        let mut idx = StatsIndex::new(db.clone(), schema(), 1 << 16);
        idx.add(&pack(1, 1, (1, 100))).unwrap();
        idx.store().unwrap();
        let v1_filter = encode_filter_key(1, 1, 1);

        // several rewrite cycles pass while a reader holds epoch 1
        let pinned = idx.snapshot();
        for v in 2..=5u32 {
            idx.update(&pack(1, v, (1, v as u64 * 100))).unwrap();
            idx.store().unwrap();
        }
        idx.run_gc().unwrap();
        assert!(has_key(&db, &idx.keys[STATS_FILTER_KEY], &v1_filter));

        // the watermark advances only once the reader lets go
        pinned.release();
        idx.run_gc().unwrap();
        assert!(!has_key(&db, &idx.keys[STATS_FILTER_KEY], &v1_filter));
        assert!(!has_key(
            &db,
            &idx.keys[STATS_FILTER_KEY],
            &encode_filter_key(1, 1, 4)
        ));
        assert!(has_key(
            &db,
            &idx.keys[STATS_FILTER_KEY],
            &encode_filter_key(1, 1, 5)
        ));
    }

    #[test]
    fn test_run_gc_without_tombstones() {
        let idx = StatsIndex::new(Arc::new(MemBackend::new()), schema(), 1 << 16);
        idx.run_gc().unwrap();
        assert!(!idx.need_cleanup().unwrap());
    }

    #[test]
    fn test_cleanup_drops_stale_live_epochs() {
        let db = Arc::new(MemBackend::new());
        let mut idx = StatsIndex::new(db.clone(), schema(), 1 << 16);
        idx.add(&pack(1, 1, (1, 100))).unwrap();
        idx.store().unwrap();

        let mut late = StatsIndex::new(db, schema(), 1 << 16).with_epoch(5);
        assert!(late.need_cleanup().unwrap());
        late.cleanup_epochs().unwrap();
        assert!(!late.need_cleanup().unwrap());
        late.load().unwrap();
        assert_eq!(late.len(), 1);
    }
}
