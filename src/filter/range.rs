//! Positional range filter for integer columns
//!
//! Buckets the value domain by significant byte-group of `value - min`:
//! 256 slots per group, 8 groups covering 64-bit deltas. Each used slot
//! records the contiguous half-open row interval `[first, last+1)` in
//! which values of that bucket were observed, so range predicates can
//! narrow a pack scan to a row interval instead of reading every row.
//!
//! Top-group buckets are coarse, so an out-of-range upper bound on a
//! range query is not always detected. The result is a superset of the
//! matching rows either way.

use byteorder::{ByteOrder, LittleEndian};

use crate::column::ColumnVec;
use crate::error::{Error, Result};
use crate::filter::{CondValue, Condition};
use crate::types::{FilterMode, ScanRange, Value};

/// Bucket index for `val` relative to `min`, plus an in-range flag
/// (false when val < min). The slot packs the bucket's byte-group into
/// the high bits: group `r` occupies slots `r*256 .. r*256+256`.
fn get_slot(val: &Value, min: &Value) -> Option<(usize, bool)> {
    let (delta, ok) = val.int_delta(min)?;
    let mut r = 0usize;
    if delta != 0 {
        r = 7 - (delta.leading_zeros() as usize >> 3);
    }
    Some(((delta >> (r << 3)) as usize + (r << 8), ok))
}

/// Positional range filter over one integer column of one data pack
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    lower: Vec<u32>,
    /// Exclusive row bound per slot; 0 marks an unused slot
    upper: Vec<u32>,
}

impl RangeFilter {
    /// Build from a column's values and its known min/max. Fails on
    /// non-integer columns.
    pub fn build(values: &ColumnVec, min: &Value, max: &Value) -> Result<Self> {
        let (top, _) = get_slot(max, min).ok_or(Error::UnsupportedType)?;
        let n_slots = top + 1;
        let mut f = Self {
            lower: vec![0; n_slots],
            upper: vec![0; n_slots],
        };
        for i in 0..values.len() {
            let (slot, _) = get_slot(&values.get(i), min).ok_or(Error::UnsupportedType)?;
            if f.upper[slot] == 0 {
                f.lower[slot] = i as u32;
            }
            f.upper[slot] = i as u32 + 1;
        }
        Ok(f)
    }

    pub fn num_slots(&self) -> usize {
        self.lower.len()
    }

    /// Narrow a pack scan for one condition. None means the filter
    /// cannot narrow and the caller scans the whole pack.
    pub fn query(&self, cond: &Condition, min: &Value, n_rows: u32) -> Option<ScanRange> {
        match (&cond.mode, &cond.value) {
            (FilterMode::Eq, CondValue::One(v)) => {
                let (slot, ok) = get_slot(v, min)?;
                if !ok || slot >= self.num_slots() || self.upper[slot] == 0 {
                    return None;
                }
                Some(ScanRange::new(self.lower[slot], self.upper[slot]))
            }
            (FilterMode::Lt, CondValue::One(v)) => {
                let (end, ok) = get_slot(&v.int_dec()?, min)?;
                if !ok {
                    return None;
                }
                self.merge_range(0, end, n_rows)
            }
            (FilterMode::Le, CondValue::One(v)) => {
                let (end, ok) = get_slot(v, min)?;
                if !ok {
                    return None;
                }
                self.merge_range(0, end, n_rows)
            }
            (FilterMode::Gt, CondValue::One(v)) => {
                let start = match get_slot(&v.int_inc()?, min)? {
                    (s, true) if s >= self.num_slots() => return None,
                    (s, true) => s,
                    (_, false) => 0,
                };
                self.merge_range(start, self.num_slots() - 1, n_rows)
            }
            (FilterMode::Ge, CondValue::One(v)) => {
                let start = match get_slot(v, min)? {
                    (s, true) if s >= self.num_slots() => return None,
                    (s, true) => s,
                    (_, false) => 0,
                };
                self.merge_range(start, self.num_slots() - 1, n_rows)
            }
            (FilterMode::Range, CondValue::Span(lo, hi)) => self.span_range(lo, hi, min, n_rows),
            (FilterMode::In, CondValue::Set(_)) => {
                let (lo, hi) = cond.set_bounds()?;
                let (lo, hi) = (lo.clone(), hi.clone());
                self.span_range(&lo, &hi, min, n_rows)
            }
            // Ne and NotIn cannot narrow a positional scan
            _ => None,
        }
    }

    fn span_range(&self, lo: &Value, hi: &Value, min: &Value, n_rows: u32) -> Option<ScanRange> {
        let start = match get_slot(lo, min)? {
            (s, true) if s >= self.num_slots() => return None,
            (s, true) => s,
            (_, false) => 0,
        };
        let (end, ok) = get_slot(hi, min)?;
        if !ok {
            return None;
        }
        self.merge_range(start, end, n_rows)
    }

    /// Union of the used slots' intervals inside `[start, end]`
    fn merge_range(&self, start: usize, end: usize, n_rows: u32) -> Option<ScanRange> {
        if start >= self.num_slots() {
            return None;
        }
        let end = end.min(self.num_slots() - 1);

        let mut lower = u32::MAX;
        for i in start..=end {
            if self.upper[i] == 0 {
                continue;
            }
            lower = lower.min(self.lower[i]);
            if lower == 0 {
                break;
            }
        }

        let mut upper = 0u32;
        for i in start..=end {
            upper = upper.max(self.upper[i]);
            if upper == n_rows {
                break;
            }
        }
        if upper == 0 {
            // no used slot in the window
            return None;
        }
        Some(ScanRange::new(lower, upper))
    }

    /// Encode as the lower array followed by the upper array, LE u32s
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.lower.len() * 8];
        let half = self.lower.len() * 4;
        LittleEndian::write_u32_into(&self.lower, &mut buf[..half]);
        LittleEndian::write_u32_into(&self.upper, &mut buf[half..]);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() % 8 != 0 {
            return Err(Error::StorageCorrupt("range filter misaligned".into()));
        }
        let half = data.len() / 2;
        let n = half / 4;
        let mut lower = vec![0u32; n];
        let mut upper = vec![0u32; n];
        LittleEndian::read_u32_into(&data[..half], &mut lower);
        LittleEndian::read_u32_into(&data[half..], &mut upper);
        Ok(Self { lower, upper })
    }
}
