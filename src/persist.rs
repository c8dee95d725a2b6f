//! Tree persistence
//!
//! Store identifies updated inner nodes and leaves, writes tombstones
//! for the previous version of each, then writes new node versions and
//! column blocks. All of it happens in a single backend transaction, so
//! tombstones, tree records and blocks stay consistent.
//!
//! When a leaf runs empty after a large delete the leaf array compacts
//! and the whole inner tree is rebuilt and rewritten. Even at a billion
//! table rows the tree holds only a few dozen leaves, so the rewrite
//! stays small.
//!
//! Load walks the tree bucket with a reverse cursor. Storage keys end
//! in a sortable version, so the newest version of every node appears
//! first and older duplicates are skipped. Versions wrap at u32; a
//! wrapped node would load stale until the next full tree rewrite.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::column::ColumnVec;
use crate::encoding::keys::{
    encode_block_key, encode_epoch_key, encode_node_key, encode_pack_tomb_key, decode_node_key,
    KIND_INODE, KIND_SNODE, STATS_BLOCK_KEY, STATS_EPOCH_KEY, STATS_TOMB_KEY, STATS_TREE_KEY,
    TOMB_KIND_STATS_PACK, TOMB_KIND_TABLE_PACK, TOMB_KIND_TREE_NODE,
};
use crate::encoding::row::RowView;
use crate::error::{Error, Result};
use crate::gc;
use crate::index::StatsIndex;
use crate::snapshot::Snapshot;
use crate::store::{Backend, Direction, WriteTx};
use crate::tree::inode::{encode_meta_row, INode};
use crate::tree::snode::SNode;
use crate::tree::{inner_size_for, Tree};
use crate::types::{max_col, min_col, ValueType, STATS_ROW_KEY, STATS_ROW_NVALS};

impl<B: Backend + 'static> StatsIndex<B> {
    /// Load the persisted tree and recover from an unclean shutdown:
    /// drop stale live epochs, reclaim tombstones of broken future
    /// epochs and reload.
    pub fn open(&mut self) -> Result<()> {
        match self.load() {
            // fresh table, nothing stored yet
            Err(Error::BucketNotFound(_)) => return Ok(()),
            other => other?,
        }
        if !self.clean {
            self.cleanup_epochs()?;
            self.load()?;
        }
        Ok(())
    }

    /// Persist all pending changes under the current epoch and publish
    /// the result as the next reader snapshot. The epoch advances after
    /// a successful pass.
    pub fn store(&mut self) -> Result<()> {
        let pending = !self.pack_tombs.is_empty()
            || !self.tree.node_tombs.is_empty()
            || self.tree.snodes.iter().any(|n| n.dirty || n.is_empty())
            || self.tree.inodes.iter().flatten().any(|n| n.dirty);
        if !pending {
            return Ok(());
        }

        let db = self.db.clone();
        let keys = self.keys.clone();
        let schema = self.schema.clone();
        let epoch = self.epoch;
        let mut n_written = 0u64;

        db.update(|tx| {
            if tx.bucket(&[keys[STATS_TREE_KEY].as_slice()]).is_none() {
                for k in &keys {
                    tx.create_bucket(&[k.as_slice()])?;
                }
            }

            // tombstones land under the predecessor epoch so they
            // become collectable as soon as no older epoch is live
            let tomb_epoch = encode_epoch_key(epoch.wrapping_sub(1));
            for kind in [TOMB_KIND_TABLE_PACK, TOMB_KIND_STATS_PACK, TOMB_KIND_TREE_NODE] {
                tx.create_bucket(&[
                    keys[STATS_TOMB_KEY].as_slice(),
                    tomb_epoch.as_slice(),
                    &[kind],
                ])?;
            }
            let put_tomb = |tx: &mut dyn WriteTx, kind: u8, key: &[u8]| -> Result<()> {
                tx.bucket_mut(&[
                    keys[STATS_TOMB_KEY].as_slice(),
                    tomb_epoch.as_slice(),
                    &[kind],
                ])
                .ok_or_else(|| Error::BucketNotFound("tomb".into()))?
                .put(key, &[])
            };

            // replaced table pack versions queued by update/delete
            for (pk, pv) in self.pack_tombs.drain(..) {
                put_tomb(tx, TOMB_KIND_TABLE_PACK, &encode_pack_tomb_key(pk, pv))?;
            }

            // drop empty leaves; survivors keep their order but may
            // shift to a lower id, which invalidates their storage key
            let before: Vec<(u32, u32, bool)> = self
                .tree
                .snodes
                .iter()
                .map(|n| (n.key(), n.version(), n.is_empty()))
                .collect();
            let removed = self.tree.remove_empty_leaves();
            let have_empty = !removed.is_empty();
            for (i, node) in &removed {
                if node.version() > 0 {
                    put_tomb(
                        tx,
                        TOMB_KIND_TREE_NODE,
                        &encode_node_key(KIND_SNODE, *i as u32, node.key(), node.version()),
                    )?;
                    put_tomb(
                        tx,
                        TOMB_KIND_STATS_PACK,
                        &encode_pack_tomb_key(node.key(), node.version()),
                    )?;
                }
            }
            if have_empty {
                let mut new_j = 0usize;
                for (orig, (key, ver, empty)) in before.iter().enumerate() {
                    if *empty {
                        continue;
                    }
                    if orig != new_j && *ver > 0 {
                        put_tomb(
                            tx,
                            TOMB_KIND_TREE_NODE,
                            &encode_node_key(KIND_SNODE, orig as u32, *key, *ver),
                        )?;
                        Arc::make_mut(&mut self.tree.snodes[new_j]).dirty = true;
                    }
                    new_j += 1;
                }
            }

            // inner nodes relocated by tree growth
            for t in std::mem::take(&mut self.tree.node_tombs) {
                if t.version > 0 {
                    put_tomb(
                        tx,
                        TOMB_KIND_TREE_NODE,
                        &encode_node_key(KIND_INODE, t.id, 0, t.version),
                    )?;
                }
            }

            if have_empty {
                // rebuild the whole inner tree: tombstone every stored
                // inner node and pick a version outside the range still
                // on disk
                let (mut vmin, mut vmax) = (u32::MAX, 0u32);
                for (i, slot) in self.tree.inodes.iter().enumerate() {
                    let Some(n) = slot else { continue };
                    vmin = vmin.min(n.version);
                    vmax = vmax.max(n.version);
                    if n.version > 0 {
                        put_tomb(
                            tx,
                            TOMB_KIND_TREE_NODE,
                            &encode_node_key(KIND_INODE, i as u32, 0, n.version),
                        )?;
                    }
                }
                let n_epochs = tx
                    .bucket(&[keys[STATS_EPOCH_KEY].as_slice()])
                    .map_or(0, |b| b.iter(Direction::Forward).count());
                // restart at version 1 only when no prior epoch can
                // still reference it
                let ver = if vmin != u32::MAX && vmin > 1 && n_epochs <= 1 {
                    0
                } else {
                    vmax
                };
                self.tree.rebuild(ver);
            } else if epoch > 1 {
                // previous versions of dirty inner nodes become garbage
                // (nothing is stored yet on the initial epoch)
                for (i, slot) in self.tree.inodes.iter().enumerate() {
                    let Some(n) = slot else { continue };
                    if n.dirty && n.version > 0 {
                        put_tomb(
                            tx,
                            TOMB_KIND_TREE_NODE,
                            &encode_node_key(KIND_INODE, i as u32, 0, n.version),
                        )?;
                    }
                }
            }

            // mark this epoch live
            tx.bucket_mut(&[keys[STATS_EPOCH_KEY].as_slice()])
                .ok_or_else(|| Error::BucketNotFound("epochs".into()))?
                .put(&encode_epoch_key(epoch), &[])?;

            // write dirty inner nodes at their next version
            for (i, slot) in self.tree.inodes.iter_mut().enumerate() {
                let Some(arc) = slot else { continue };
                if !arc.dirty {
                    continue;
                }
                let mut node = (**arc).clone();
                node.version = node.version.wrapping_add(1);
                node.dirty = false;
                let meta = node.encode_meta(&schema)?;
                tx.bucket_mut(&[keys[STATS_TREE_KEY].as_slice()])
                    .ok_or_else(|| Error::BucketNotFound("stats tree".into()))?
                    .put(&encode_node_key(KIND_INODE, i as u32, 0, node.version), &meta)?;
                n_written += meta.len() as u64;
                *slot = Some(Arc::new(node));
            }

            // write dirty leaves: tombstone the previous version, then
            // write the meta row and every column block at the new one
            for (i, arc) in self.tree.snodes.iter_mut().enumerate() {
                if !arc.dirty {
                    continue;
                }
                let mut node = (**arc).clone();
                let (skey, sver) = (node.key(), node.version());
                if sver > 0 {
                    put_tomb(
                        tx,
                        TOMB_KIND_TREE_NODE,
                        &encode_node_key(KIND_SNODE, i as u32, skey, sver),
                    )?;
                    put_tomb(tx, TOMB_KIND_STATS_PACK, &encode_pack_tomb_key(skey, sver))?;
                }
                let ver = sver.wrapping_add(1);
                node.set_version(ver);
                let meta = encode_meta_row(&schema, node.meta.as_ref())?;
                tx.bucket_mut(&[keys[STATS_TREE_KEY].as_slice()])
                    .ok_or_else(|| Error::BucketNotFound("stats tree".into()))?
                    .put(&encode_node_key(KIND_SNODE, i as u32, skey, ver), &meta)?;
                n_written += meta.len() as u64;

                let mut disk = 0u64;
                {
                    let mut blocks = tx
                        .bucket_mut(&[keys[STATS_BLOCK_KEY].as_slice()])
                        .ok_or_else(|| Error::BucketNotFound("stats blocks".into()))?;
                    for c in 0..schema.num_stats_cols() {
                        let col = node.col(c).ok_or_else(|| {
                            Error::StorageCorrupt(format!(
                                "store of stats pack {skey} with unloaded column {c}"
                            ))
                        })?;
                        let buf = col.encode();
                        blocks.put(&encode_block_key(skey, ver, c as u16), &buf)?;
                        disk += buf.len() as u64;
                    }
                    let vers = node.pack_versions().ok_or_else(|| {
                        Error::StorageCorrupt(format!(
                            "store of stats pack {skey} with unloaded versions"
                        ))
                    })?;
                    let buf = ColumnVec::U32(vers.to_vec()).encode();
                    blocks.put(
                        &encode_block_key(skey, ver, schema.version_field_id()),
                        &buf,
                    )?;
                    disk += buf.len() as u64;
                }
                node.disk_size = disk;
                node.dirty = false;
                n_written += disk;
                *arc = Arc::new(node);
            }

            Ok(())
        })?;

        self.bytes_written.fetch_add(n_written, Ordering::Relaxed);
        if n_written > 0 {
            self.clean = false;
        }

        // publish for readers; the replaced snapshot retires its epoch
        // and sweeps tombstones once its last reader finishes
        let cleanup = {
            let db = self.db.clone();
            let keys = self.keys.clone();
            let fields = self.gc_fields.clone();
            Box::new(move |e: u32| {
                if let Err(err) = db.update(|tx| gc::retire_epoch_tx(tx, &keys, &fields, e)) {
                    log::error!("stats gc: epoch {e}: {err}");
                }
            })
        };
        self.cell
            .update(Arc::new(Snapshot::with_cleanup(self.tree.clone(), epoch, cleanup)));
        self.epoch = epoch.wrapping_add(1);
        log::debug!(
            "stats[{}]: stored epoch {}, {} leaves, {} bytes",
            self.schema.name(),
            epoch,
            self.tree.num_leaves(),
            n_written
        );
        Ok(())
    }

    /// Rebuild the in-memory tree from storage. Leaves come back as
    /// shells with only the key, row count, row-id min/max and pack
    /// version columns loaded.
    pub fn load(&mut self) -> Result<()> {
        let db = self.db.clone();
        let keys = self.keys.clone();
        let schema = self.schema.clone();
        let epoch = self.epoch;
        let rid = schema.rid_col();
        let eager = [STATS_ROW_KEY, STATS_ROW_NVALS, min_col(rid), max_col(rid)];
        let mut n_read = 0u64;

        let (tree, clean) = db.view(|tx| {
            let tree_b = tx.bucket(&[keys[STATS_TREE_KEY].as_slice()]).ok_or_else(|| {
                Error::BucketNotFound(String::from_utf8_lossy(&keys[STATS_TREE_KEY]).into())
            })?;
            let clean = !gc::need_cleanup_tx(tx, &keys, epoch);
            let types = schema.stats_types();

            let mut inodes: Vec<Option<Arc<INode>>> = Vec::new();
            let mut shells: Vec<Option<SNode>> = Vec::new();
            let mut last = None;
            // reverse cursor: highest leaf id first fixes both array
            // sizes, and per node the newest version comes first
            for (k, v) in tree_b.iter(Direction::Reverse) {
                let (kind, id, key, ver) = decode_node_key(&k)?;
                if last == Some((kind, id, key)) {
                    continue;
                }
                last = Some((kind, id, key));
                if shells.is_empty() && inodes.is_empty() {
                    inodes = vec![None; inner_size_for(id as usize)];
                    shells = (0..=id).map(|_| None).collect();
                }
                match kind {
                    KIND_SNODE => {
                        let Some(slot) = shells.get_mut(id as usize) else {
                            continue;
                        };
                        let view = RowView::new(&types, &v)?;
                        let meta = (0..view.num_cols()).map(|i| view.get(i)).collect();
                        *slot = Some(SNode::new_shell(key, ver, &schema, meta));
                        n_read += v.len() as u64;
                    }
                    KIND_INODE => {
                        // ids past the current geometry belong to stale
                        // epochs not yet collected
                        let Some(slot) = inodes.get_mut(id as usize) else {
                            continue;
                        };
                        *slot = Some(Arc::new(INode::decode_meta(&schema, ver, &v)?));
                        n_read += v.len() as u64;
                    }
                    _ => {
                        return Err(Error::StorageCorrupt(format!(
                            "invalid tree node kind {kind}"
                        )))
                    }
                }
            }

            let block_b = tx
                .bucket(&[keys[STATS_BLOCK_KEY].as_slice()])
                .ok_or_else(|| Error::BucketNotFound("stats blocks".into()))?;
            let mut snodes = Vec::with_capacity(shells.len());
            for (id, shell) in shells.into_iter().enumerate() {
                let mut node = shell
                    .ok_or_else(|| Error::StorageCorrupt(format!("missing leaf node {id}")))?;
                for c in eager {
                    let bkey = encode_block_key(node.key(), node.version(), c as u16);
                    let buf = block_b.get(&bkey).ok_or_else(|| {
                        Error::StorageCorrupt(format!(
                            "missing block {c} of stats pack {}",
                            node.key()
                        ))
                    })?;
                    n_read += buf.len() as u64;
                    node.set_col(c, ColumnVec::decode(types[c], &buf)?);
                }
                let bkey =
                    encode_block_key(node.key(), node.version(), schema.version_field_id());
                let buf = block_b.get(&bkey).ok_or_else(|| {
                    Error::StorageCorrupt(format!(
                        "missing version block of stats pack {}",
                        node.key()
                    ))
                })?;
                n_read += buf.len() as u64;
                match ColumnVec::decode(ValueType::U32, &buf)? {
                    ColumnVec::U32(v) => node.set_pack_versions(v),
                    _ => unreachable!(),
                }
                snodes.push(Arc::new(node));
            }

            Ok((
                Tree {
                    inodes,
                    snodes,
                    node_tombs: Vec::new(),
                },
                clean,
            ))
        })?;

        self.tree = tree;
        self.clean = clean;
        self.bytes_read.fetch_add(n_read, Ordering::Relaxed);
        self.cell.update(Arc::new(Snapshot::new(
            self.tree.clone(),
            epoch.wrapping_sub(1),
        )));
        log::debug!(
            "stats[{}]: loaded {} leaves, {} inner slots",
            self.schema.name(),
            self.tree.num_leaves(),
            self.tree.inner_len()
        );
        Ok(())
    }

    /// Delete all index storage and reset the in-memory state
    pub fn drop_all(&mut self) -> Result<()> {
        self.tree = Tree::new();
        self.pack_tombs.clear();
        let db = self.db.clone();
        let keys = self.keys.clone();
        db.update(|tx| {
            for k in &keys {
                let _ = tx.delete_bucket(&[k.as_slice()]);
            }
            Ok(())
        })?;
        self.cell
            .update(Arc::new(Snapshot::new(Tree::new(), self.epoch)));
        Ok(())
    }
}
