//! Versioned min/max statistics index for columnar data packs
//!
//! Tracks one summary Record per data pack of a table (min/max per
//! column, row count, disk size) in an array-backed aggregation tree,
//! so queries can skip packs by range overlap and merges can place new
//! rows without scanning data. Storage is copy-on-write and epoch
//! versioned: one writer publishes immutable snapshots, any number of
//! readers pin them, and garbage collection reclaims replaced versions
//! once no snapshot can reference them.

pub mod bitset;
pub mod column;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod gc;
pub mod index;
pub mod iter;
pub mod pack;
pub mod persist;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod tree;
pub mod types;

pub use error::{Error, Result};
pub use filter::{CondValue, Condition, Filter};
pub use index::StatsIndex;
pub use iter::{CancelToken, PackPlacement, QueryIterator};
pub use pack::{ColumnStats, PackStats};
pub use schema::{Field, FilterKind, Schema};
pub use snapshot::Snapshot;
pub use store::memory::MemBackend;
pub use store::Backend;
pub use types::{FilterMode, ScanRange, SortOrder, Value, ValueType};
