//! In-memory backend over nested ordered maps
//!
//! One mutex guards the whole tree, so every transaction sees a
//! consistent state and writers are serialized. Good enough for tests
//! and ephemeral indexes; durable deployments plug in their own
//! [`Backend`](super::Backend).

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::store::{Backend, Direction, KvPair, ReadBucket, ReadTx, WriteBucket, WriteTx};

#[derive(Debug, Default)]
struct Node {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    subs: BTreeMap<Vec<u8>, Node>,
}

impl Node {
    fn descend(&self, path: &[&[u8]]) -> Option<&Node> {
        let mut node = self;
        for name in path {
            node = node.subs.get(*name)?;
        }
        Some(node)
    }

    fn descend_mut(&mut self, path: &[&[u8]]) -> Option<&mut Node> {
        let mut node = self;
        for name in path {
            node = node.subs.get_mut(*name)?;
        }
        Some(node)
    }
}

/// Ephemeral nested-bucket key-value store
#[derive(Debug, Default)]
pub struct MemBackend {
    root: Mutex<Node>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemBackend {
    fn view<T>(&self, f: impl FnOnce(&dyn ReadTx) -> Result<T>) -> Result<T> {
        let guard = self.root.lock();
        let tx = MemTx { root: &guard };
        f(&tx)
    }

    fn update<T>(&self, f: impl FnOnce(&mut dyn WriteTx) -> Result<T>) -> Result<T> {
        let mut guard = self.root.lock();
        let mut tx = MemTxMut { root: &mut guard };
        f(&mut tx)
    }
}

struct MemTx<'t> {
    root: &'t Node,
}

impl ReadTx for MemTx<'_> {
    fn bucket(&self, path: &[&[u8]]) -> Option<Box<dyn ReadBucket + '_>> {
        self.root
            .descend(path)
            .map(|n| Box::new(BucketView { node: n }) as Box<dyn ReadBucket>)
    }
}

struct MemTxMut<'t> {
    root: &'t mut Node,
}

impl ReadTx for MemTxMut<'_> {
    fn bucket(&self, path: &[&[u8]]) -> Option<Box<dyn ReadBucket + '_>> {
        self.root
            .descend(path)
            .map(|n| Box::new(BucketView { node: n }) as Box<dyn ReadBucket>)
    }
}

impl WriteTx for MemTxMut<'_> {
    fn bucket_mut(&mut self, path: &[&[u8]]) -> Option<Box<dyn WriteBucket + '_>> {
        self.root
            .descend_mut(path)
            .map(|n| Box::new(BucketViewMut { node: n }) as Box<dyn WriteBucket>)
    }

    fn create_bucket(&mut self, path: &[&[u8]]) -> Result<()> {
        let mut node = &mut *self.root;
        for name in path {
            node = node.subs.entry(name.to_vec()).or_default();
        }
        Ok(())
    }

    fn delete_bucket(&mut self, path: &[&[u8]]) -> Result<()> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| Error::BucketNotFound("empty bucket path".into()))?;
        if let Some(parent) = self.root.descend_mut(parents) {
            parent.subs.remove(*last);
        }
        Ok(())
    }
}

struct BucketView<'b> {
    node: &'b Node,
}

impl ReadBucket for BucketView<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.node.data.get(key).cloned()
    }

    fn iter(&self, dir: Direction) -> Box<dyn Iterator<Item = KvPair> + '_> {
        iter_node(self.node, dir)
    }

    fn sub_names(&self) -> Vec<Vec<u8>> {
        self.node.subs.keys().cloned().collect()
    }
}

struct BucketViewMut<'b> {
    node: &'b mut Node,
}

impl ReadBucket for BucketViewMut<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.node.data.get(key).cloned()
    }

    fn iter(&self, dir: Direction) -> Box<dyn Iterator<Item = KvPair> + '_> {
        iter_node(self.node, dir)
    }

    fn sub_names(&self) -> Vec<Vec<u8>> {
        self.node.subs.keys().cloned().collect()
    }
}

impl WriteBucket for BucketViewMut<'_> {
    fn put(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        self.node.data.insert(key.to_vec(), val.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.node.data.remove(key);
        Ok(())
    }
}

fn iter_node(node: &Node, dir: Direction) -> Box<dyn Iterator<Item = KvPair> + '_> {
    let fwd = node.data.iter().map(|(k, v)| (k.clone(), v.clone()));
    match dir {
        Direction::Forward => Box::new(fwd),
        Direction::Reverse => Box::new(fwd.rev()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let db = MemBackend::new();
        db.update(|tx| {
            tx.create_bucket(&[b"t1"])?;
            let mut b = tx
                .bucket_mut(&[b"t1"])
                .ok_or_else(|| Error::BucketNotFound("t1".into()))?;
            b.put(b"a", b"1")?;
            b.put(b"b", b"2")?;
            b.delete(b"a")?;
            Ok(())
        })
        .unwrap();

        db.view(|tx| {
            let b = tx.bucket(&[b"t1"]).unwrap();
            assert_eq!(b.get(b"a"), None);
            assert_eq!(b.get(b"b"), Some(b"2".to_vec()));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_cursor_order() {
        let db = MemBackend::new();
        db.update(|tx| {
            tx.create_bucket(&[b"t"])?;
            let mut b = tx.bucket_mut(&[b"t"]).unwrap();
            for k in [b"c", b"a", b"b"] {
                b.put(k, b"")?;
            }
            Ok(())
        })
        .unwrap();

        db.view(|tx| {
            let b = tx.bucket(&[b"t"]).unwrap();
            let fwd: Vec<_> = b.iter(Direction::Forward).map(|(k, _)| k).collect();
            assert_eq!(fwd, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
            let rev: Vec<_> = b.iter(Direction::Reverse).map(|(k, _)| k).collect();
            assert_eq!(rev, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_nested_buckets() {
        let db = MemBackend::new();
        db.update(|tx| {
            tx.create_bucket(&[b"tomb", b"\x01", b"\x02"])?;
            tx.create_bucket(&[b"tomb", b"\x03"])?;
            Ok(())
        })
        .unwrap();

        db.view(|tx| {
            let b = tx.bucket(&[b"tomb"]).unwrap();
            assert_eq!(b.sub_names(), vec![b"\x01".to_vec(), b"\x03".to_vec()]);
            assert!(tx.bucket(&[b"tomb", b"\x01", b"\x02"]).is_some());
            Ok(())
        })
        .unwrap();

        db.update(|tx| tx.delete_bucket(&[b"tomb", b"\x01"])).unwrap();
        db.view(|tx| {
            assert!(tx.bucket(&[b"tomb", b"\x01"]).is_none());
            Ok(())
        })
        .unwrap();
    }
}
