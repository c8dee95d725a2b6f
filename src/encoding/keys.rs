//! Storage key codecs
//!
//! Persisted layout (bit-exact):
//! - tree node:  `kind(1B) ∥ uvarint(node_id) ∥ uvarint(pack_key) ∥ uvarint(version)`
//! - filter:     `uvarint(field_id) ∥ uvarint(pack_key) ∥ uvarint(version & 0xFFFF)`
//! - block:      `uvarint(pack_key) ∥ uvarint(version) ∥ uvarint(field_id)`
//! - epoch:      `uvarint(epoch)` with an empty value
//! - tombstones: nested buckets `epoch → kind-byte → key`

use crate::encoding::{encode_uvarint, get_uvarint, put_uvarint, MAX_UVARINT_LEN};
use crate::error::{Error, Result};

/// Tree node kinds as stored in the first key byte
pub const KIND_INODE: u8 = 1;
pub const KIND_SNODE: u8 = 2;

/// Tombstone kind bytes (one nested bucket each per epoch)
pub const TOMB_KIND_TABLE_PACK: u8 = 1;
pub const TOMB_KIND_STATS_PACK: u8 = 2;
pub const TOMB_KIND_TREE_NODE: u8 = 3;

/// Per-table bucket name suffixes
pub const BLOCK_KEY_SUFFIX: &[u8] = b"_stats_block";
pub const TREE_KEY_SUFFIX: &[u8] = b"_stats_tree";
pub const FILTER_KEY_SUFFIX: &[u8] = b"_filter";
pub const RANGE_KEY_SUFFIX: &[u8] = b"_range";
pub const EPOCH_KEY_SUFFIX: &[u8] = b"_epoch";
pub const TOMB_KEY_SUFFIX: &[u8] = b"_tomb";

/// Number of logical buckets per indexed table
pub const STATS_BUCKETS: usize = 6;

/// Bucket slot indexes into the precomputed key array
pub const STATS_BLOCK_KEY: usize = 0;
pub const STATS_TREE_KEY: usize = 1;
pub const STATS_FILTER_KEY: usize = 2;
pub const STATS_RANGE_KEY: usize = 3;
pub const STATS_EPOCH_KEY: usize = 4;
pub const STATS_TOMB_KEY: usize = 5;

/// Build the six bucket names for a table
pub fn make_bucket_names(table: &str) -> [Vec<u8>; STATS_BUCKETS] {
    let make = |suffix: &[u8]| {
        let mut k = Vec::with_capacity(table.len() + suffix.len());
        k.extend_from_slice(table.as_bytes());
        k.extend_from_slice(suffix);
        k
    };
    [
        make(BLOCK_KEY_SUFFIX),
        make(TREE_KEY_SUFFIX),
        make(FILTER_KEY_SUFFIX),
        make(RANGE_KEY_SUFFIX),
        make(EPOCH_KEY_SUFFIX),
        make(TOMB_KEY_SUFFIX),
    ]
}

/// Encode a tree node storage key
pub fn encode_node_key(kind: u8, id: u32, key: u32, ver: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 3 * MAX_UVARINT_LEN);
    buf.push(kind);
    put_uvarint(&mut buf, id as u64);
    put_uvarint(&mut buf, key as u64);
    put_uvarint(&mut buf, ver as u64);
    buf
}

/// Decode a tree node storage key into (kind, id, pack key, version)
pub fn decode_node_key(buf: &[u8]) -> Result<(u8, u32, u32, u32)> {
    let kind = *buf
        .first()
        .ok_or_else(|| Error::StorageCorrupt("empty tree node key".into()))?;
    let mut pos = 1;
    let mut vals = [0u32; 3];
    for v in vals.iter_mut() {
        let (x, n) = get_uvarint(&buf[pos..])
            .ok_or_else(|| Error::StorageCorrupt("truncated tree node key".into()))?;
        *v = x as u32;
        pos += n;
    }
    Ok((kind, vals[0], vals[1], vals[2]))
}

/// Encode a bloom/fuse/bitmap/range filter storage key
pub fn encode_filter_key(field_id: u16, pack_key: u32, version: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 * MAX_UVARINT_LEN);
    put_uvarint(&mut buf, field_id as u64);
    put_uvarint(&mut buf, pack_key as u64);
    put_uvarint(&mut buf, (version & 0xFFFF) as u64);
    buf
}

/// Encode a statistics block storage key (one column of one spack version)
pub fn encode_block_key(pack_key: u32, version: u32, field_id: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 * MAX_UVARINT_LEN);
    put_uvarint(&mut buf, pack_key as u64);
    put_uvarint(&mut buf, version as u64);
    put_uvarint(&mut buf, field_id as u64);
    buf
}

/// Encode a tombstone entry naming a pack version (blocks resolved at GC)
pub fn encode_pack_tomb_key(pack_key: u32, version: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 * MAX_UVARINT_LEN);
    put_uvarint(&mut buf, pack_key as u64);
    put_uvarint(&mut buf, version as u64);
    buf
}

/// Decode a pack tombstone entry into (pack key, version)
pub fn decode_pack_tomb_key(buf: &[u8]) -> Result<(u32, u32)> {
    let (pk, n) =
        get_uvarint(buf).ok_or_else(|| Error::StorageCorrupt("truncated tomb key".into()))?;
    let (pv, _) = get_uvarint(&buf[n..])
        .ok_or_else(|| Error::StorageCorrupt("truncated tomb key".into()))?;
    Ok((pk as u32, pv as u32))
}

/// Encode an epoch liveness key
pub fn encode_epoch_key(epoch: u32) -> Vec<u8> {
    encode_uvarint(epoch as u64)
}

/// Decode an epoch liveness key
pub fn decode_epoch_key(buf: &[u8]) -> Result<u32> {
    let (v, _) =
        get_uvarint(buf).ok_or_else(|| Error::StorageCorrupt("truncated epoch key".into()))?;
    Ok(v as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key_roundtrip() {
        for (kind, id, key, ver) in [
            (KIND_INODE, 0, 0, 1),
            (KIND_SNODE, 7, 12345, 300),
            (KIND_SNODE, u32::MAX, u32::MAX, u32::MAX),
        ] {
            let buf = encode_node_key(kind, id, key, ver);
            assert_eq!(decode_node_key(&buf).unwrap(), (kind, id, key, ver));
        }
    }

    #[test]
    fn test_node_key_version_order() {
        // newer versions of the same node must sort after older ones so a
        // reverse cursor sees the newest first
        let a = encode_node_key(KIND_SNODE, 3, 99, 254);
        let b = encode_node_key(KIND_SNODE, 3, 99, 255);
        let c = encode_node_key(KIND_SNODE, 3, 99, 256);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_filter_key_truncates_version() {
        let a = encode_filter_key(5, 10, 0x1_0002);
        let b = encode_filter_key(5, 10, 0x0002);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bucket_names() {
        let names = make_bucket_names("acct");
        assert_eq!(names[STATS_TREE_KEY], b"acct_stats_tree".to_vec());
        assert_eq!(names[STATS_TOMB_KEY], b"acct_tomb".to_vec());
    }
}
