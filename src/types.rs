//! Core value and query types shared across the index

use std::cmp::Ordering;

/// Maximum number of statistics rows (data packs) per leaf node
pub const STATS_PACK_SIZE: usize = 2048;

/// Number of fixed header columns in a statistics row.
/// Column `i` of the table occupies wire positions `2*i + STATS_COL_OFFSET`
/// (min) and `2*i + STATS_COL_OFFSET + 1` (max). Schema evolution only
/// appends columns, so these positions are stable.
pub const STATS_COL_OFFSET: usize = 4;

/// Header column positions inside a statistics row
pub const STATS_ROW_KEY: usize = 0; // pack key (u32); min key in meta rows
pub const STATS_ROW_SCHEMA: usize = 1; // schema hash (u64); pack count in meta rows
pub const STATS_ROW_NVALS: usize = 2; // row count (u64); sum in meta rows
pub const STATS_ROW_SIZE: usize = 3; // on-disk size (u64); sum in meta rows

/// Wire position of the min statistic for table column `i`
#[inline]
pub fn min_col(i: usize) -> usize {
    2 * i + STATS_COL_OFFSET
}

/// Wire position of the max statistic for table column `i`
#[inline]
pub fn max_col(i: usize) -> usize {
    2 * i + STATS_COL_OFFSET + 1
}

/// Physical type of a statistics column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    U32,
    U64,
    I64,
    F64,
    Bytes,
}

impl ValueType {
    /// Zero value used for deleted or absent columns
    pub fn zero(&self) -> Value {
        match self {
            ValueType::U32 => Value::U32(0),
            ValueType::U64 => Value::U64(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F64 => Value::F64(0.0),
            ValueType::Bytes => Value::Bytes(Vec::new()),
        }
    }

    /// True for integer types eligible for range filters
    pub fn is_int(&self) -> bool {
        matches!(self, ValueType::U32 | ValueType::U64 | ValueType::I64)
    }
}

/// A single statistics value (one min or max cell)
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U32(u32),
    U64(u64),
    I64(i64),
    F64(f64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::U32(_) => ValueType::U32,
            Value::U64(_) => ValueType::U64,
            Value::I64(_) => ValueType::I64,
            Value::F64(_) => ValueType::F64,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Value::U32(v) => *v,
            Value::U64(v) => *v as u32,
            Value::I64(v) => *v as u32,
            _ => 0,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            Value::U32(v) => *v as u64,
            Value::U64(v) => *v,
            Value::I64(v) => *v as u64,
            _ => 0,
        }
    }

    /// Compare two values of the same type. Values of different types are
    /// unordered (returns None); callers treat that as a non-match.
    pub fn cmp_same(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::U32(a), Value::U32(b)) => Some(a.cmp(b)),
            (Value::U64(a), Value::U64(b)) => Some(a.cmp(b)),
            (Value::I64(a), Value::I64(b)) => Some(a.cmp(b)),
            (Value::F64(a), Value::F64(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.as_slice().cmp(b.as_slice())),
            _ => None,
        }
    }

    /// Canonical byte representation fed into probabilistic filters.
    /// Fixed-width numerics use little-endian so all same-width types
    /// hash identically; floats use their bit pattern.
    pub fn filter_bytes(&self) -> Vec<u8> {
        match self {
            Value::U32(v) => v.to_le_bytes().to_vec(),
            Value::U64(v) => v.to_le_bytes().to_vec(),
            Value::I64(v) => v.to_le_bytes().to_vec(),
            Value::F64(v) => v.to_bits().to_le_bytes().to_vec(),
            Value::Bytes(v) => v.clone(),
        }
    }

    /// Wrapping integer distance `self - min` plus an in-range flag
    /// (false when self < min). Non-integer values return None.
    pub fn int_delta(&self, min: &Value) -> Option<(u64, bool)> {
        match (self, min) {
            (Value::U32(v), Value::U32(m)) => Some(((v.wrapping_sub(*m)) as u64, v >= m)),
            (Value::U64(v), Value::U64(m)) => Some((v.wrapping_sub(*m), v >= m)),
            (Value::I64(v), Value::I64(m)) => Some((v.wrapping_sub(*m) as u64, v >= m)),
            _ => None,
        }
    }

    /// Integer successor, saturating at the type maximum
    pub fn int_inc(&self) -> Option<Value> {
        match self {
            Value::U32(v) => Some(Value::U32(v.saturating_add(1))),
            Value::U64(v) => Some(Value::U64(v.saturating_add(1))),
            Value::I64(v) => Some(Value::I64(v.saturating_add(1))),
            _ => None,
        }
    }

    /// Integer predecessor, saturating at the type minimum
    pub fn int_dec(&self) -> Option<Value> {
        match self {
            Value::U32(v) => Some(Value::U32(v.saturating_sub(1))),
            Value::U64(v) => Some(Value::U64(v.saturating_sub(1))),
            Value::I64(v) => Some(Value::I64(v.saturating_sub(1))),
            _ => None,
        }
    }

    /// Pick the smaller of two same-typed values
    pub fn min_of(self, other: Value) -> Value {
        match self.cmp_same(&other) {
            Some(Ordering::Greater) => other,
            _ => self,
        }
    }

    /// Pick the larger of two same-typed values
    pub fn max_of(self, other: Value) -> Value {
        match self.cmp_same(&other) {
            Some(Ordering::Less) => other,
            _ => self,
        }
    }
}

/// Filter comparison mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Range,
    In,
    NotIn,
}

impl FilterMode {
    /// True for modes a membership filter (bloom/fuse/bitmap) can answer
    pub fn uses_membership_filter(&self) -> bool {
        matches!(self, FilterMode::Eq | FilterMode::In)
    }
}

/// Result order for query iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Half-open row interval `[start, end)` inside a single data pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub start: u32,
    pub end: u32,
}

impl ScanRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}
