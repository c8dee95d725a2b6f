//! Typed column vectors backing leaf statistics
//!
//! Min and max statistics for one table column across all packs of a
//! leaf live in one contiguous typed vector, persisted as one block.
//! Blocks encode as little-endian fixed-width runs; byte columns add a
//! uvarint length prefix per element.

use byteorder::{ByteOrder, LittleEndian};

use crate::encoding::{get_uvarint, put_uvarint};
use crate::error::{Error, Result};
use crate::types::{Value, ValueType};

/// A typed vector of statistics values
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnVec {
    U32(Vec<u32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bytes(Vec<Vec<u8>>),
}

impl ColumnVec {
    pub fn new(typ: ValueType) -> Self {
        Self::with_capacity(typ, 0)
    }

    pub fn with_capacity(typ: ValueType, cap: usize) -> Self {
        match typ {
            ValueType::U32 => ColumnVec::U32(Vec::with_capacity(cap)),
            ValueType::U64 => ColumnVec::U64(Vec::with_capacity(cap)),
            ValueType::I64 => ColumnVec::I64(Vec::with_capacity(cap)),
            ValueType::F64 => ColumnVec::F64(Vec::with_capacity(cap)),
            ValueType::Bytes => ColumnVec::Bytes(Vec::with_capacity(cap)),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            ColumnVec::U32(_) => ValueType::U32,
            ColumnVec::U64(_) => ValueType::U64,
            ColumnVec::I64(_) => ValueType::I64,
            ColumnVec::F64(_) => ValueType::F64,
            ColumnVec::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnVec::U32(v) => v.len(),
            ColumnVec::U64(v) => v.len(),
            ColumnVec::I64(v) => v.len(),
            ColumnVec::F64(v) => v.len(),
            ColumnVec::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value; type mismatches append the column's zero value
    pub fn push(&mut self, val: &Value) {
        match (self, val) {
            (ColumnVec::U32(v), Value::U32(x)) => v.push(*x),
            (ColumnVec::U64(v), Value::U64(x)) => v.push(*x),
            (ColumnVec::I64(v), Value::I64(x)) => v.push(*x),
            (ColumnVec::F64(v), Value::F64(x)) => v.push(*x),
            (ColumnVec::Bytes(v), Value::Bytes(x)) => v.push(x.clone()),
            (ColumnVec::U32(v), _) => v.push(0),
            (ColumnVec::U64(v), _) => v.push(0),
            (ColumnVec::I64(v), _) => v.push(0),
            (ColumnVec::F64(v), _) => v.push(0.0),
            (ColumnVec::Bytes(v), _) => v.push(Vec::new()),
        }
    }

    pub fn get(&self, i: usize) -> Value {
        match self {
            ColumnVec::U32(v) => Value::U32(v[i]),
            ColumnVec::U64(v) => Value::U64(v[i]),
            ColumnVec::I64(v) => Value::I64(v[i]),
            ColumnVec::F64(v) => Value::F64(v[i]),
            ColumnVec::Bytes(v) => Value::Bytes(v[i].clone()),
        }
    }

    pub fn set(&mut self, i: usize, val: &Value) {
        match (self, val) {
            (ColumnVec::U32(v), Value::U32(x)) => v[i] = *x,
            (ColumnVec::U64(v), Value::U64(x)) => v[i] = *x,
            (ColumnVec::I64(v), Value::I64(x)) => v[i] = *x,
            (ColumnVec::F64(v), Value::F64(x)) => v[i] = *x,
            (ColumnVec::Bytes(v), Value::Bytes(x)) => v[i] = x.clone(),
            _ => {}
        }
    }

    /// Remove the element at `i`, shifting later elements down
    pub fn remove(&mut self, i: usize) {
        match self {
            ColumnVec::U32(v) => {
                v.remove(i);
            }
            ColumnVec::U64(v) => {
                v.remove(i);
            }
            ColumnVec::I64(v) => {
                v.remove(i);
            }
            ColumnVec::F64(v) => {
                v.remove(i);
            }
            ColumnVec::Bytes(v) => {
                v.remove(i);
            }
        }
    }

    /// Smallest element, or the type's zero when empty
    pub fn min_value(&self) -> Value {
        self.fold(Value::min_of)
    }

    /// Largest element, or the type's zero when empty
    pub fn max_value(&self) -> Value {
        self.fold(Value::max_of)
    }

    fn fold(&self, pick: fn(Value, Value) -> Value) -> Value {
        if self.is_empty() {
            return self.value_type().zero();
        }
        let mut acc = self.get(0);
        for i in 1..self.len() {
            acc = pick(acc, self.get(i));
        }
        acc
    }

    /// Encode all elements into a storage block
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len() * 8);
        match self {
            ColumnVec::U32(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_le_bytes());
                }
            }
            ColumnVec::U64(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_le_bytes());
                }
            }
            ColumnVec::I64(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_le_bytes());
                }
            }
            ColumnVec::F64(v) => {
                for x in v {
                    buf.extend_from_slice(&x.to_bits().to_le_bytes());
                }
            }
            ColumnVec::Bytes(v) => {
                for x in v {
                    put_uvarint(&mut buf, x.len() as u64);
                    buf.extend_from_slice(x);
                }
            }
        }
        buf
    }

    /// Decode a storage block back into a typed vector
    pub fn decode(typ: ValueType, buf: &[u8]) -> Result<Self> {
        let corrupt = || Error::StorageCorrupt("truncated statistics block".into());
        match typ {
            ValueType::U32 => {
                if buf.len() % 4 != 0 {
                    return Err(corrupt());
                }
                Ok(ColumnVec::U32(
                    buf.chunks_exact(4).map(LittleEndian::read_u32).collect(),
                ))
            }
            ValueType::U64 => {
                if buf.len() % 8 != 0 {
                    return Err(corrupt());
                }
                Ok(ColumnVec::U64(
                    buf.chunks_exact(8).map(LittleEndian::read_u64).collect(),
                ))
            }
            ValueType::I64 => {
                if buf.len() % 8 != 0 {
                    return Err(corrupt());
                }
                Ok(ColumnVec::I64(
                    buf.chunks_exact(8).map(LittleEndian::read_i64).collect(),
                ))
            }
            ValueType::F64 => {
                if buf.len() % 8 != 0 {
                    return Err(corrupt());
                }
                Ok(ColumnVec::F64(
                    buf.chunks_exact(8)
                        .map(|c| f64::from_bits(LittleEndian::read_u64(c)))
                        .collect(),
                ))
            }
            ValueType::Bytes => {
                let mut vals = Vec::new();
                let mut pos = 0;
                while pos < buf.len() {
                    let (len, n) = get_uvarint(&buf[pos..]).ok_or_else(corrupt)?;
                    pos += n;
                    let end = pos + len as usize;
                    if end > buf.len() {
                        return Err(corrupt());
                    }
                    vals.push(buf[pos..end].to_vec());
                    pos = end;
                }
                Ok(ColumnVec::Bytes(vals))
            }
        }
    }
}
