//! Table schema and the derived statistics wire schema
//!
//! The statistics index never sees table rows, only per-pack summaries.
//! Each table schema deterministically derives a statistics schema: four
//! header columns followed by a (min, max) pair per table column, in
//! declaration order. Schema evolution appends columns only, so wire
//! positions of existing statistics stay stable across versions.

use crate::types::{ValueType, STATS_COL_OFFSET};

/// Per-column membership filter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// No membership filter
    None,
    /// Blocked bloom filter, sized as `cardinality * factor` bytes
    Bloom(u8),
    /// Binary fuse filter over 8-bit fingerprints
    Fuse,
    /// Exact bitmap of observed values (low-cardinality integers)
    Bits,
}

impl FilterKind {
    pub fn is_none(&self) -> bool {
        matches!(self, FilterKind::None)
    }
}

/// One column of an indexed table
#[derive(Debug, Clone)]
pub struct Field {
    /// Stable field id, also the filter storage key component
    pub id: u16,
    pub name: String,
    pub typ: ValueType,
    /// Membership filter built for this column, if any
    pub filter: FilterKind,
    /// Build a positional range filter (integer columns only)
    pub range: bool,
}

impl Field {
    pub fn new(id: u16, name: &str, typ: ValueType) -> Self {
        Self {
            id,
            name: name.to_string(),
            typ,
            filter: FilterKind::None,
            range: false,
        }
    }

    pub fn with_filter(mut self, kind: FilterKind) -> Self {
        self.filter = kind;
        self
    }

    pub fn with_range(mut self) -> Self {
        self.range = self.typ.is_int();
        self
    }
}

/// Schema of an indexed table
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
    /// Index of the row-id column used for pk lookups
    rid_col: usize,
    hash: u64,
}

impl Schema {
    pub fn new(name: &str, fields: Vec<Field>, rid_col: usize) -> Self {
        let hash = schema_hash(name, &fields);
        Self {
            name: name.to_string(),
            fields,
            rid_col,
            hash,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Index of the row-id column
    pub fn rid_col(&self) -> usize {
        self.rid_col
    }

    /// Content hash identifying this schema version
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Number of wire columns in a statistics row for this schema
    pub fn num_stats_cols(&self) -> usize {
        STATS_COL_OFFSET + 2 * self.fields.len()
    }

    /// Field id of the out-of-row pack version block. One past the last
    /// statistics column so it can never collide with a min/max block.
    pub fn version_field_id(&self) -> u16 {
        self.num_stats_cols() as u16
    }

    /// Wire types of a statistics row: key, schema hash, row count and
    /// disk size headers, then a (min, max) pair per table column
    pub fn stats_types(&self) -> Vec<ValueType> {
        let mut types = Vec::with_capacity(self.num_stats_cols());
        types.push(ValueType::U32);
        types.push(ValueType::U64);
        types.push(ValueType::U64);
        types.push(ValueType::U64);
        for f in &self.fields {
            types.push(f.typ);
            types.push(f.typ);
        }
        types
    }

    /// Table column index for a statistics wire position, or None for
    /// header columns
    pub fn field_of_col(&self, col: usize) -> Option<usize> {
        if col < STATS_COL_OFFSET {
            return None;
        }
        let i = (col - STATS_COL_OFFSET) / 2;
        (i < self.fields.len()).then_some(i)
    }
}

/// FNV-1a over the schema identity: table name plus each field's name
/// and type tag, in declaration order
fn schema_hash(name: &str, fields: &[Field]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut h = OFFSET;
    let mut mix = |bytes: &[u8]| {
        for &b in bytes {
            h ^= b as u64;
            h = h.wrapping_mul(PRIME);
        }
    };
    mix(name.as_bytes());
    for f in fields {
        mix(f.name.as_bytes());
        mix(&[f.typ as u8]);
    }
    h
}
