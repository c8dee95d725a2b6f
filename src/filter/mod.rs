//! Query filter tree and per-pack filter construction
//!
//! A query arrives as an AND/OR combinator tree over per-column
//! conditions. Tree descent and the vectorized leaf match only use
//! min/max range overlap tests, which never produce false negatives.
//! Equality and membership conditions are additionally checked against
//! the pack's persisted probabilistic filter before a pack is yielded.

pub mod bits;
pub mod bloom;
pub mod fuse;
pub mod range;

use crate::types::{FilterMode, Value};

/// Condition operand
#[derive(Debug, Clone)]
pub enum CondValue {
    /// Single comparison value (Eq, Ne, Lt, Le, Gt, Ge)
    One(Value),
    /// Inclusive bounds for Range mode
    Span(Value, Value),
    /// Sorted value set for In/NotIn
    Set(Vec<Value>),
}

/// One predicate on one table column
#[derive(Debug, Clone)]
pub struct Condition {
    /// Table column index
    pub field: usize,
    pub mode: FilterMode,
    pub value: CondValue,
}

impl Condition {
    pub fn new(field: usize, mode: FilterMode, value: CondValue) -> Self {
        Self { field, mode, value }
    }

    pub fn eq(field: usize, value: Value) -> Self {
        Self::new(field, FilterMode::Eq, CondValue::One(value))
    }

    /// Can any value in `[min, max]` satisfy this condition? Used for
    /// pruning, so uncertainty answers true.
    pub fn match_range(&self, min: &Value, max: &Value) -> bool {
        match (&self.mode, &self.value) {
            (FilterMode::Eq, CondValue::One(v)) => {
                in_range(v, min, max)
            }
            (FilterMode::Ne, CondValue::One(v)) => {
                // only a constant interval pins every row to v
                !(eq_val(min, v) && eq_val(max, v))
            }
            (FilterMode::Lt, CondValue::One(v)) => lt_val(min, v),
            (FilterMode::Le, CondValue::One(v)) => le_val(min, v),
            (FilterMode::Gt, CondValue::One(v)) => lt_val(v, max),
            (FilterMode::Ge, CondValue::One(v)) => le_val(v, max),
            (FilterMode::Range, CondValue::Span(lo, hi)) => {
                le_val(lo, max) && le_val(min, hi)
            }
            (FilterMode::In, CondValue::Set(set)) => {
                // the set is sorted, its envelope must overlap first
                match (set.first(), set.last()) {
                    (Some(lo), Some(hi)) => {
                        le_val(lo, max)
                            && le_val(min, hi)
                            && set.iter().any(|v| in_range(v, min, max))
                    }
                    _ => false,
                }
            }
            (FilterMode::NotIn, CondValue::Set(set)) => {
                // only a constant interval fully inside the set is excluded
                !(eq_val(min, max) && set.iter().any(|v| eq_val(v, min)))
            }
            // mode/operand mismatch never prunes
            _ => true,
        }
    }

    /// Envelope of the condition's value set, used by the positional
    /// range filter for In queries
    pub fn set_bounds(&self) -> Option<(&Value, &Value)> {
        match &self.value {
            CondValue::Set(set) => Some((set.first()?, set.last()?)),
            _ => None,
        }
    }
}

fn eq_val(a: &Value, b: &Value) -> bool {
    a.cmp_same(b) == Some(std::cmp::Ordering::Equal)
}

fn lt_val(a: &Value, b: &Value) -> bool {
    a.cmp_same(b) == Some(std::cmp::Ordering::Less)
}

fn le_val(a: &Value, b: &Value) -> bool {
    matches!(
        a.cmp_same(b),
        Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
    )
}

fn in_range(v: &Value, min: &Value, max: &Value) -> bool {
    le_val(min, v) && le_val(v, max)
}

/// AND/OR combinator tree over conditions
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Cond(Condition),
}

impl Filter {
    /// Evaluate against an interval source mapping a table column to its
    /// aggregated (min, max). Short-circuits: an OR is satisfied by its
    /// first matching child, an AND rejected by its first miss.
    pub fn match_ranges<F>(&self, ranges: &F) -> bool
    where
        F: Fn(usize) -> (Value, Value),
    {
        match self {
            Filter::And(children) => children.iter().all(|c| c.match_ranges(ranges)),
            Filter::Or(children) => children.iter().any(|c| c.match_ranges(ranges)),
            Filter::Cond(cond) => {
                let (min, max) = ranges(cond.field);
                cond.match_range(&min, &max)
            }
        }
    }

    /// Visit every leaf condition
    pub fn for_each_cond<F: FnMut(&Condition)>(&self, f: &mut F) {
        match self {
            Filter::And(children) | Filter::Or(children) => {
                for c in children {
                    c.for_each_cond(f);
                }
            }
            Filter::Cond(cond) => f(cond),
        }
    }

    /// Visit only the conditions every matching row must satisfy: the
    /// root condition and all conjunctive descendants. Conditions under
    /// an Or are optional and never visited.
    pub fn for_each_required<F: FnMut(&Condition)>(&self, f: &mut F) {
        match self {
            Filter::And(children) => {
                for c in children {
                    c.for_each_required(f);
                }
            }
            Filter::Or(_) => {}
            Filter::Cond(cond) => f(cond),
        }
    }

    /// Table columns referenced anywhere in the tree, deduplicated
    pub fn fields(&self) -> Vec<usize> {
        let mut fields = Vec::new();
        self.for_each_cond(&mut |c| {
            if !fields.contains(&c.field) {
                fields.push(c.field);
            }
        });
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> Value {
        Value::U64(v)
    }

    #[test]
    fn test_cond_match_range() {
        let min = u(10);
        let max = u(20);
        assert!(Condition::eq(0, u(15)).match_range(&min, &max));
        assert!(!Condition::eq(0, u(9)).match_range(&min, &max));
        assert!(!Condition::eq(0, u(21)).match_range(&min, &max));

        let lt = Condition::new(0, FilterMode::Lt, CondValue::One(u(11)));
        assert!(lt.match_range(&min, &max));
        let lt = Condition::new(0, FilterMode::Lt, CondValue::One(u(10)));
        assert!(!lt.match_range(&min, &max));

        let ge = Condition::new(0, FilterMode::Ge, CondValue::One(u(20)));
        assert!(ge.match_range(&min, &max));
        let gt = Condition::new(0, FilterMode::Gt, CondValue::One(u(20)));
        assert!(!gt.match_range(&min, &max));

        let rg = Condition::new(0, FilterMode::Range, CondValue::Span(u(19), u(30)));
        assert!(rg.match_range(&min, &max));
        let rg = Condition::new(0, FilterMode::Range, CondValue::Span(u(21), u(30)));
        assert!(!rg.match_range(&min, &max));
    }

    #[test]
    fn test_ne_and_notin_only_prune_constant_intervals() {
        let ne = Condition::new(0, FilterMode::Ne, CondValue::One(u(5)));
        assert!(ne.match_range(&u(0), &u(9)));
        assert!(!ne.match_range(&u(5), &u(5)));

        let ni = Condition::new(0, FilterMode::NotIn, CondValue::Set(vec![u(5), u(7)]));
        assert!(ni.match_range(&u(5), &u(7)));
        assert!(!ni.match_range(&u(7), &u(7)));
    }

    #[test]
    fn test_in_checks_members_not_just_envelope() {
        let set = CondValue::Set(vec![u(1), u(9)]);
        let cond = Condition::new(0, FilterMode::In, set);
        // envelope [1,9] overlaps [4,6] but no member is inside
        assert!(!cond.match_range(&u(4), &u(6)));
        assert!(cond.match_range(&u(8), &u(12)));
    }

    #[test]
    fn test_required_conditions_stop_at_or() {
        let f = Filter::And(vec![
            Filter::Cond(Condition::eq(0, u(5))),
            Filter::And(vec![Filter::Cond(Condition::eq(1, u(7)))]),
            Filter::Or(vec![
                Filter::Cond(Condition::eq(2, u(1))),
                Filter::Cond(Condition::eq(3, u(2))),
            ]),
        ]);
        let mut required = Vec::new();
        f.for_each_required(&mut |c| required.push(c.field));
        assert_eq!(required, vec![0, 1]);

        let mut all = Vec::new();
        f.for_each_cond(&mut |c| all.push(c.field));
        assert_eq!(all, vec![0, 1, 2, 3]);

        // an Or at the root makes every condition optional
        let mut none = Vec::new();
        Filter::Or(vec![Filter::Cond(Condition::eq(0, u(5)))])
            .for_each_required(&mut |c| none.push(c.field));
        assert!(none.is_empty());
    }

    #[test]
    fn test_tree_short_circuit() {
        let f = Filter::And(vec![
            Filter::Cond(Condition::eq(0, u(5))),
            Filter::Or(vec![
                Filter::Cond(Condition::eq(1, u(100))),
                Filter::Cond(Condition::new(
                    1,
                    FilterMode::Gt,
                    CondValue::One(u(50)),
                )),
            ]),
        ]);
        let ranges = |field: usize| match field {
            0 => (u(0), u(10)),
            _ => (u(40), u(60)),
        };
        assert!(f.match_ranges(&ranges));

        let miss = |field: usize| match field {
            0 => (u(6), u(10)),
            _ => (u(40), u(60)),
        };
        assert!(Filter::Cond(Condition::eq(0, u(5))).match_ranges(&miss) == false);
        assert_eq!(f.fields(), vec![0, 1]);
    }
}
