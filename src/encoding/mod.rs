//! Binary encoding primitives
//!
//! Storage keys use a memcmp-sortable big-endian varint so that cursor
//! order over encoded keys equals numeric order. This is load-bearing:
//! the loader walks node keys in reverse to see newest versions first,
//! and the GC scans tombstone epochs in ascending order.

pub mod keys;
pub mod row;

/// Maximum encoded size of a sortable uvarint
pub const MAX_UVARINT_LEN: usize = 9;

/// Append a memcmp-sortable uvarint encoding of `v` to `buf`.
///
/// Single-byte values cover 0..=240; larger values get a length-coded
/// first byte followed by big-endian payload bytes, so byte-wise
/// comparison of two encodings matches integer comparison.
pub fn put_uvarint(buf: &mut Vec<u8>, v: u64) {
    if v <= 240 {
        buf.push(v as u8);
    } else if v <= 2287 {
        buf.push((241 + (v - 240) / 256) as u8);
        buf.push(((v - 240) % 256) as u8);
    } else if v <= 67823 {
        buf.push(249);
        buf.push(((v - 2288) / 256) as u8);
        buf.push(((v - 2288) % 256) as u8);
    } else {
        let bytes = v.to_be_bytes();
        let skip = v.leading_zeros() as usize / 8;
        let n = 8 - skip;
        buf.push((247 + n) as u8);
        buf.extend_from_slice(&bytes[skip..]);
    }
}

/// Encode a single uvarint into a fresh buffer
pub fn encode_uvarint(v: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_UVARINT_LEN);
    put_uvarint(&mut buf, v);
    buf
}

/// Decode a sortable uvarint from the front of `buf`.
/// Returns the value and the number of bytes consumed, or None when
/// the buffer is empty or truncated.
pub fn get_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let a0 = *buf.first()? as u64;
    match a0 {
        0..=240 => Some((a0, 1)),
        241..=248 => {
            let a1 = *buf.get(1)? as u64;
            Some((240 + 256 * (a0 - 241) + a1, 2))
        }
        249 => {
            let a1 = *buf.get(1)? as u64;
            let a2 = *buf.get(2)? as u64;
            Some((2288 + 256 * a1 + a2, 3))
        }
        _ => {
            let n = (a0 - 247) as usize;
            if buf.len() < 1 + n {
                return None;
            }
            let mut v = 0u64;
            for &b in &buf[1..1 + n] {
                v = (v << 8) | b as u64;
            }
            Some((v, 1 + n))
        }
    }
}
