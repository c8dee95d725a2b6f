//! Positional wire codec for statistics rows
//!
//! A statistics row (Record or aggregated meta row) is a fixed-shape
//! sequence of values laid out in schema order: little-endian fixed
//! widths for numerics, uvarint-length-prefixed payloads for byte
//! columns. Values are addressed by wire position, never by name.

use byteorder::{ByteOrder, LittleEndian};

use crate::encoding::{get_uvarint, put_uvarint};
use crate::error::{Error, Result};
use crate::types::{Value, ValueType};

/// Serial row builder writing values in wire position order
pub struct RowWriter<'a> {
    types: &'a [ValueType],
    buf: Vec<u8>,
    next: usize,
}

impl<'a> RowWriter<'a> {
    pub fn new(types: &'a [ValueType]) -> Self {
        Self {
            types,
            buf: Vec::with_capacity(types.len() * 8),
            next: 0,
        }
    }

    /// Write the next column value. The value must match the schema type
    /// at the current position; mismatches write the type's zero value.
    pub fn write(&mut self, val: &Value) {
        let typ = self.types[self.next];
        self.next += 1;
        match (typ, val) {
            (ValueType::U32, Value::U32(v)) => {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            (ValueType::U64, Value::U64(v)) => {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            (ValueType::I64, Value::I64(v)) => {
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            (ValueType::F64, Value::F64(v)) => {
                self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            (ValueType::Bytes, Value::Bytes(v)) => {
                put_uvarint(&mut self.buf, v.len() as u64);
                self.buf.extend_from_slice(v);
            }
            _ => {
                let zero = typ.zero();
                self.next -= 1;
                self.write(&zero);
            }
        }
    }

    /// Finish the row. All columns must have been written.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.next != self.types.len() {
            return Err(Error::StorageCorrupt(format!(
                "short statistics row: {} of {} columns",
                self.next,
                self.types.len()
            )));
        }
        Ok(self.buf)
    }
}

/// Zero-copy positional reader over an encoded statistics row
pub struct RowView<'a> {
    types: &'a [ValueType],
    buf: &'a [u8],
    offsets: Vec<u32>,
}

impl<'a> RowView<'a> {
    /// Parse column offsets. Fails when the buffer is shorter than the
    /// schema requires.
    pub fn new(types: &'a [ValueType], buf: &'a [u8]) -> Result<Self> {
        let mut offsets = Vec::with_capacity(types.len());
        let mut pos = 0usize;
        for t in types {
            offsets.push(pos as u32);
            let width = match t {
                ValueType::U32 => 4,
                ValueType::U64 | ValueType::I64 | ValueType::F64 => 8,
                ValueType::Bytes => {
                    let (len, n) = get_uvarint(&buf[pos..])
                        .ok_or_else(|| Error::StorageCorrupt("truncated row".into()))?;
                    n + len as usize
                }
            };
            pos += width;
            if pos > buf.len() {
                return Err(Error::StorageCorrupt("truncated statistics row".into()));
            }
        }
        Ok(Self {
            types,
            buf,
            offsets,
        })
    }

    pub fn num_cols(&self) -> usize {
        self.types.len()
    }

    /// Read the value at wire position `i`
    pub fn get(&self, i: usize) -> Value {
        let pos = self.offsets[i] as usize;
        match self.types[i] {
            ValueType::U32 => Value::U32(LittleEndian::read_u32(&self.buf[pos..])),
            ValueType::U64 => Value::U64(LittleEndian::read_u64(&self.buf[pos..])),
            ValueType::I64 => Value::I64(LittleEndian::read_i64(&self.buf[pos..])),
            ValueType::F64 => Value::F64(f64::from_bits(LittleEndian::read_u64(&self.buf[pos..]))),
            ValueType::Bytes => {
                let (len, n) = get_uvarint(&self.buf[pos..]).unwrap_or((0, 0));
                Value::Bytes(self.buf[pos + n..pos + n + len as usize].to_vec())
            }
        }
    }
}
