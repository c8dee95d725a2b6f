//! Crate-wide error type
//!
//! Backend I/O errors are propagated unchanged; nothing in this crate
//! retries a failed backend call. Retry policy belongs to the merge or
//! transaction layer above.

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Statistics index error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required backend bucket is missing. Fatal to the current
    /// operation, never retried locally.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// Stored bytes violate the expected layout
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    /// Update/delete targeted a pack key the index has no entry for.
    /// This is a consistency invariant violation, not a lookup miss.
    #[error("missing statistics record for pack key {0}")]
    MissingRecord(u32),

    /// Range filter construction requested on a non-integer column
    #[error("range filter: unsupported column type")]
    UnsupportedType,

    /// Fuse filter construction exhausted its retry limit
    #[error("filter build failed: {0}")]
    FilterBuildFailure(String),

    /// Query canceled via its cancellation token
    #[error("query canceled")]
    Canceled,

    /// Backend I/O error, passed through unchanged
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
