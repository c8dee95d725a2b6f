//! Array-backed statistics tree
//!
//! Inner nodes and leaves live in two flat arrays indexed breadth
//! first: the root is slot 0, slot `i` has children `2i+1` and `2i+2`,
//! parent is `(i-1)/2`. Leaf `j` occupies global slot
//! `inner_len - 1 + j`; usable inner slots are `0..=inner_len-2`. The
//! inner array length is zero or a power of two and always at least
//! the leaf count.
//!
//! Nodes are shared by value behind Arc. A writer working on a private
//! tree clone replaces nodes instead of mutating them in place, so
//! readers holding an older snapshot keep a consistent view.

pub mod inode;
pub mod snode;

use std::sync::Arc;

use crate::pack::PackStats;
use crate::schema::Schema;
use crate::tree::inode::{merge_meta, INode, MetaRow};
use crate::tree::snode::SNode;

/// Parent slot of a global tree slot
#[inline]
pub fn parent(slot: usize) -> usize {
    (slot - 1) / 2
}

#[inline]
fn floor_log2(n: usize) -> usize {
    usize::BITS as usize - 1 - n.leading_zeros() as usize
}

/// Inner array length for a tree whose highest leaf id is `max_id`:
/// the leaf count rounded up to a power of two, at least 2. Must agree
/// with [`Tree::append_leaf`] growth and [`Tree::rebuild`], or a loaded
/// tree's leaf band would misalign with its stored inner nodes.
#[inline]
pub fn inner_size_for(max_id: usize) -> usize {
    (max_id + 1).next_power_of_two().max(2)
}

/// Binary search for the first index in `0..n` satisfying `pred`
fn search(n: usize, pred: impl Fn(usize) -> bool) -> usize {
    let (mut i, mut j) = (0, n);
    while i < j {
        let h = (i + j) / 2;
        if pred(h) {
            j = h;
        } else {
            i = h + 1;
        }
    }
    i
}

/// Previous storage identity of a replaced or relocated inner node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTomb {
    pub id: u32,
    pub version: u32,
}

/// The in-memory statistics tree
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub inodes: Vec<Option<Arc<INode>>>,
    pub snodes: Vec<Arc<SNode>>,
    /// Old inner-node keys invalidated by geometry changes since the
    /// last store, drained by the persistence pass
    pub node_tombs: Vec<NodeTomb>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_leaves(&self) -> usize {
        self.snodes.len()
    }

    pub fn inner_len(&self) -> usize {
        self.inodes.len()
    }

    /// Number of live Records across all leaves
    pub fn len(&self) -> usize {
        self.snodes.iter().map(|n| n.n_packs()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.snodes.iter().all(|n| n.is_empty())
    }

    /// Total table rows summed over all live Records
    pub fn count(&self) -> u64 {
        self.snodes
            .iter()
            .map(|n| (0..n.n_packs()).map(|i| n.nvals_at(i)).sum::<u64>())
            .sum()
    }

    /// Global slot of leaf `j`
    pub fn leaf_slot(&self, j: usize) -> usize {
        self.inner_len() - 1 + j
    }

    /// Leaf index for a global slot, if the slot is in the leaf band
    pub fn leaf_of_slot(&self, slot: usize) -> Option<usize> {
        let base = self.inner_len().checked_sub(1)?;
        (slot >= base).then(|| slot - base)
    }

    pub(crate) fn child_meta(&self, slot: usize) -> Option<&MetaRow> {
        match self.leaf_of_slot(slot) {
            Some(j) => self.snodes.get(j).and_then(|n| n.meta.as_ref()),
            None => self.inodes.get(slot)?.as_ref().and_then(|n| n.meta.as_ref()),
        }
    }

    /// Aggregated root statistics, if the tree is populated
    pub fn root_meta(&self) -> Option<&MetaRow> {
        self.inodes.first()?.as_ref()?.meta.as_ref()
    }

    /// Placement target for a new pack key: the first leaf whose key
    /// interval should absorb it. None means a new leaf is required.
    pub fn find_placement(&self, key: u32) -> Option<usize> {
        let n = self.num_leaves();
        let i = search(n, |i| {
            let leaf = &self.snodes[i];
            key <= leaf.max_key() || (key > leaf.min_key() && leaf.has_space())
        });
        (i < n).then_some(i)
    }

    /// Leaf owning an existing pack key. Leaf key intervals never
    /// overlap, so the first leaf with `max_key >= key` is the only
    /// candidate.
    pub fn find_owner(&self, key: u32) -> Option<usize> {
        let n = self.num_leaves();
        let i = search(n, |i| self.snodes[i].max_key() >= key);
        (i < n && self.snodes[i].min_key() <= key).then_some(i)
    }

    /// Next unused leaf pack key
    pub fn next_leaf_key(&self) -> u32 {
        self.snodes.iter().map(|n| n.key()).max().map_or(1, |k| k + 1)
    }

    /// Append a fresh empty leaf, growing the inner array when the
    /// current level is full. Returns the new leaf index.
    pub fn append_leaf(&mut self, schema: &Schema) -> usize {
        if self.num_leaves() == self.inner_len() {
            self.grow();
        }
        let node = SNode::new(self.next_leaf_key(), schema);
        self.snodes.push(Arc::new(node));
        self.num_leaves() - 1
    }

    /// Double the inner array. Existing inner nodes relocate to
    /// `i + 2^floor(log2(i+1))`, which turns the previous tree into the
    /// left subtree of the new root without recomputing any aggregate.
    /// Relocated nodes change their storage id, so their old keys are
    /// recorded for tombstoning.
    fn grow(&mut self) {
        let old_len = self.inner_len();
        let new_len = if old_len == 0 { 2 } else { old_len * 2 };
        let mut inodes: Vec<Option<Arc<INode>>> = vec![None; new_len];
        if old_len >= 2 {
            for i in (0..=old_len - 2).rev() {
                if let Some(node) = self.inodes[i].take() {
                    self.node_tombs.push(NodeTomb {
                        id: i as u32,
                        version: node.version,
                    });
                    let mut moved = (*node).clone();
                    moved.dirty = true;
                    inodes[i + (1 << floor_log2(i + 1))] = Some(Arc::new(moved));
                }
            }
        }
        self.inodes = inodes;
    }

    /// Recompute the ancestor chain of one leaf after its meta row
    /// changed, stopping at the first unchanged merge
    pub fn propagate(&mut self, leaf_idx: usize) {
        let mut slot = self.leaf_slot(leaf_idx);
        loop {
            let p = parent(slot);
            let merged = merge_meta(self.child_meta(2 * p + 1), self.child_meta(2 * p + 2));
            let unchanged = self
                .inodes[p]
                .as_ref()
                .is_some_and(|n| n.meta == merged);
            if unchanged {
                break;
            }
            let mut node = self.inodes[p]
                .as_deref()
                .cloned()
                .unwrap_or_default();
            node.meta = merged;
            node.dirty = true;
            self.inodes[p] = Some(Arc::new(node));
            if p == 0 {
                break;
            }
            slot = p;
        }
    }

    /// Drop empty leaves, returning each removed leaf with its former
    /// index for tombstoning. Callers must rebuild afterwards.
    pub fn remove_empty_leaves(&mut self) -> Vec<(usize, Arc<SNode>)> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.snodes.len());
        for (i, node) in self.snodes.drain(..).enumerate() {
            if node.is_empty() {
                removed.push((i, node));
            } else {
                kept.push(node);
            }
        }
        self.snodes = kept;
        removed
    }

    /// Rebuild every inner node bottom-up. Linear and simple beats
    /// re-threading a partially mutated array tree. All new inner
    /// nodes carry `version` and are marked dirty.
    pub fn rebuild(&mut self, version: u32) {
        let leaf_len = self.num_leaves();
        let inner_len = if leaf_len == 0 {
            0
        } else {
            leaf_len.next_power_of_two().max(2)
        };
        self.inodes = vec![None; inner_len];
        if inner_len == 0 {
            return;
        }
        for j in (0..=inner_len - 2).rev() {
            let merged = merge_meta(self.child_meta(2 * j + 1), self.child_meta(2 * j + 2));
            self.inodes[j] = Some(Arc::new(INode {
                meta: merged,
                version,
                dirty: true,
            }));
        }
    }

    /// Materialized mutable handle to a leaf, cloning when shared
    pub fn leaf_mut(&mut self, j: usize) -> &mut SNode {
        Arc::make_mut(&mut self.snodes[j])
    }

    /// Append a Record to leaf `j` and refresh aggregates
    pub fn append_to_leaf(&mut self, j: usize, pack: &PackStats, schema: &Schema) {
        let node = self.leaf_mut(j);
        node.append_record(pack);
        if node.build_meta(schema) {
            self.propagate(j);
        }
    }
}
