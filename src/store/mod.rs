//! Storage backend contract
//!
//! The index persists through a caller-supplied transactional key-value
//! store with nested buckets and ordered cursors. Transactions may
//! block on backend locks; that is opaque to this crate. The in-memory
//! implementation in [`memory`] backs the tests.

pub mod memory;

use crate::error::Result;

/// Cursor direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Key/value pair yielded by a cursor
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Read access to one bucket
pub trait ReadBucket {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Ordered cursor over all entries
    fn iter(&self, dir: Direction) -> Box<dyn Iterator<Item = KvPair> + '_>;

    /// Names of nested buckets, in key order
    fn sub_names(&self) -> Vec<Vec<u8>>;
}

/// Write access to one bucket
pub trait WriteBucket: ReadBucket {
    fn put(&mut self, key: &[u8], val: &[u8]) -> Result<()>;

    /// Delete is a no-op for absent keys
    fn delete(&mut self, key: &[u8]) -> Result<()>;
}

/// A read transaction. Buckets are addressed by path, outermost first.
pub trait ReadTx {
    fn bucket(&self, path: &[&[u8]]) -> Option<Box<dyn ReadBucket + '_>>;
}

/// A write transaction
pub trait WriteTx: ReadTx {
    fn bucket_mut(&mut self, path: &[&[u8]]) -> Option<Box<dyn WriteBucket + '_>>;

    /// Create every bucket along the path that does not yet exist
    fn create_bucket(&mut self, path: &[&[u8]]) -> Result<()>;

    /// Drop a bucket and everything nested below it
    fn delete_bucket(&mut self, path: &[&[u8]]) -> Result<()>;
}

/// Transactional key-value backend
pub trait Backend: Send + Sync {
    fn view<T>(&self, f: impl FnOnce(&dyn ReadTx) -> Result<T>) -> Result<T>;
    fn update<T>(&self, f: impl FnOnce(&mut dyn WriteTx) -> Result<T>) -> Result<T>;
}
