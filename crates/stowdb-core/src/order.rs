//! Module: order
//! Responsibility: sort keys, in-memory comparison, and order validation.

use crate::{
    error::FilterError,
    filter::{write_str, write_tag},
    model::Field,
    record::Record,
    value::{Value, canonical_cmp},
};
use sha2::Sha256;
use std::cmp::Ordering;

///
/// SortKey
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub desc: bool,
}

///
/// SearchOrder
///
/// Ordered list of sort keys. Empty means backend default (key order).
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SearchOrder(Vec<SortKey>);

impl SearchOrder {
    #[must_use]
    pub const fn none() -> Self {
        Self(Vec::new())
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::none().then_asc(field)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::none().then_desc(field)
    }

    #[must_use]
    pub fn then_asc(mut self, field: impl Into<String>) -> Self {
        self.0.push(SortKey {
            field: field.into(),
            desc: false,
        });
        self
    }

    #[must_use]
    pub fn then_desc(mut self, field: impl Into<String>) -> Self {
        self.0.push(SortKey {
            field: field.into(),
            desc: true,
        });
        self
    }

    #[must_use]
    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every sort field must exist, be readable, and be sortable.
    pub fn validate_for_fields(&self, fields: &[Field]) -> Result<(), FilterError> {
        for key in &self.0 {
            let field = fields
                .iter()
                .find(|field| field.name() == key.field)
                .ok_or_else(|| FilterError::UnknownField {
                    field: key.field.clone(),
                })?;
            if !field.readable {
                return Err(FilterError::UnreadableField {
                    field: key.field.clone(),
                });
            }
            if !field.sortable {
                return Err(FilterError::UnsortableField {
                    field: key.field.clone(),
                });
            }
        }

        Ok(())
    }

    /// Compare two records under this order (canonical value order).
    #[must_use]
    pub fn compare(&self, left: &Record, right: &Record) -> Ordering {
        for key in &self.0 {
            let cmp = canonical_cmp(left.value(&key.field), right.value(&key.field));
            let cmp = if key.desc { cmp.reverse() } else { cmp };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }

        Ordering::Equal
    }

    /// Extract a sortable key for `record`.
    #[must_use]
    pub fn sort_key(&self, record: &Record) -> OrderKey {
        OrderKey(
            self.0
                .iter()
                .map(|key| (record.value(&key.field).clone(), key.desc))
                .collect(),
        )
    }

    /// Sort `records` in place; ties fall back to `tie_break`.
    pub fn sort_records<F>(&self, records: &mut [Record], tie_break: F)
    where
        F: Fn(&Record, &Record) -> Ordering,
    {
        records.sort_by(|a, b| self.compare(a, b).then_with(|| tie_break(a, b)));
    }

    pub(crate) fn fingerprint(&self, hasher: &mut Sha256) {
        write_tag(hasher, 0x30);
        for key in &self.0 {
            write_str(hasher, &key.field);
            write_tag(hasher, u8::from(key.desc));
        }
    }
}

///
/// OrderKey
/// Materialised sort key; `Ord` honours each key's direction.
///

#[derive(Clone, Debug)]
pub struct OrderKey(Vec<(Value, bool)>);

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderKey {}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((left, desc), (right, _)) in self.0.iter().zip(&other.0) {
            let cmp = canonical_cmp(left, right);
            let cmp = if *desc { cmp.reverse() } else { cmp };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }

        self.0.len().cmp(&other.0.len())
    }
}
