//! Module: record
//! Responsibility: the generic field-name → value mapping every store operates on.

use crate::value::Value;
use derive_more::{Deref, DerefMut, IntoIterator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static NULL: Value = Value::Null;

///
/// Record
///
/// Ordered mapping from field name to [`Value`].
/// A field that is not present reads as [`Value::Null`].
///

#[derive(Clone, Debug, Default, Deref, DerefMut, Deserialize, IntoIterator, PartialEq, Serialize)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Read one field, treating absence as null.
    #[must_use]
    pub fn value(&self, field: &str) -> &Value {
        self.0.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Overlay `updates` onto this record, field by field.
    pub fn merge(&mut self, updates: &Self) {
        for (field, value) in updates.iter() {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Keep only the fields accepted by `keep`.
    #[must_use]
    pub fn retain_fields(mut self, keep: impl Fn(&str) -> bool) -> Self {
        self.0.retain(|field, _| keep(field));
        self
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_read_as_null() {
        let record = record! { "id" => "a" };

        assert_eq!(record.value("id"), &Value::from("a"));
        assert_eq!(record.value("title"), &Value::Null);
    }

    #[test]
    fn merge_overlays_updates_without_dropping_fields() {
        let mut record = record! { "id" => "a", "title" => "old", "count" => 1 };
        record.merge(&record! { "title" => "new" });

        assert_eq!(record, record! { "id" => "a", "title" => "new", "count" => 1 });
    }
}
