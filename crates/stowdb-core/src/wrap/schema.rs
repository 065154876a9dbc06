//! Module: wrap::schema
//! Responsibility: structural validation of records against `StorageMeta`
//! before they reach the inner store.
//! Does not own: write-transforms (applied by base stores) or access rules.
//! Boundary: an update is checked as the record the base store would write.

use crate::{
    context::StoreContext,
    error::{FieldViolation, StoreError},
    filter::SearchFilter,
    model::{Field, StorageMeta},
    order::SearchOrder,
    record::Record,
    store::{ResultSet, Store},
    value::Value,
};
use std::{fmt, sync::Arc};

/// Every structural problem in `record`: undeclared fields, values of the
/// wrong kind, missing required values, and over-long text or blobs.
#[must_use]
pub fn validate_record(meta: &StorageMeta, record: &Record) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    for name in record.keys() {
        if meta.field(name).is_none() {
            violations.push(FieldViolation::new(name.as_str(), "unknown_field", "field is not declared"));
        }
    }

    for field in meta.fields() {
        let value = record.value(field.name());
        if value.is_null() {
            if field.is_required() {
                violations.push(FieldViolation::new(field.name(), "required", "value is required"));
            }
            continue;
        }
        if !field.kind().accepts(value) {
            violations.push(FieldViolation::new(
                field.name(),
                "type",
                format!("expected {}, got {}", field.kind().label(), value.type_label()),
            ));
            continue;
        }
        if let Some(violation) = check_length(field, value) {
            violations.push(violation);
        }
    }

    violations
}

fn check_length(field: &Field, value: &Value) -> Option<FieldViolation> {
    let max = field.max_length?;
    let len = match value {
        Value::Text(text) => text.chars().count(),
        Value::Blob(bytes) => bytes.len(),
        _ => return None,
    };

    (len > max).then(|| {
        FieldViolation::new(
            field.name(),
            "max_length",
            format!("length {len} exceeds {max}"),
        )
    })
}

///
/// SchemaValidatingStore
///
/// Invalid creates raise `SchemaValidation` without touching the inner
/// store; invalid updates return `None`.
///

pub struct SchemaValidatingStore {
    inner: Arc<dyn Store>,
    ctx: StoreContext,
}

impl SchemaValidatingStore {
    #[must_use]
    pub fn new(inner: Arc<dyn Store>, ctx: &StoreContext) -> Self {
        Self {
            inner,
            ctx: ctx.clone(),
        }
    }
}

impl Store for SchemaValidatingStore {
    fn meta(&self) -> &StorageMeta {
        self.inner.meta()
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        let violations = validate_record(self.meta(), &item);
        if !violations.is_empty() {
            return Err(StoreError::SchemaValidation(violations));
        }

        self.inner.create(item)
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.inner.read(key)
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        self.inner.read_batch(keys)
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        let meta = self.meta();
        let key = meta.key_of(&updates)?;
        let Some(existing) = self.inner.read(&key)? else {
            return Ok(None);
        };

        // non-updatable fields are dropped before the write, undeclared ones are not
        let mut violations: Vec<FieldViolation> = updates
            .keys()
            .filter(|name| meta.field(name).is_none())
            .map(|name| FieldViolation::new(name.as_str(), "unknown_field", "field is not declared"))
            .collect();
        let prepared = meta.prepare_update(&existing, &updates, self.ctx.now());
        violations.extend(validate_record(meta, &prepared));
        if !violations.is_empty() {
            tracing::debug!(
                record = meta.name(),
                key = %key,
                violations = violations.len(),
                "update failed validation"
            );
            return Ok(None);
        }

        self.inner.update(updates, precondition)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        self.inner.count(filter)
    }

    fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<Record>, StoreError> {
        self.inner.search(filter, order, page_key, limit)
    }
}

impl fmt::Debug for SchemaValidatingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidatingStore")
            .field("record", &self.meta().name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::{BatchEdit, MemoryStore},
        test_support::{CountingStore, context, note, notes_meta},
    };

    fn codes(err: StoreError) -> Vec<(String, &'static str)> {
        match err {
            StoreError::SchemaValidation(violations) => {
                violations.into_iter().map(|v| (v.field, v.code)).collect()
            }
            other => panic!("expected schema validation, got {other:?}"),
        }
    }

    #[test]
    fn create_reports_every_violation_without_calling_inner() {
        let counted = Arc::new(CountingStore::new(Arc::new(MemoryStore::new(notes_meta(), &context()))));
        let store = SchemaValidatingStore::new(counted.clone(), &context());

        let err = store
            .create(record! { "id" => "a", "value" => "ten", "bogus" => 1, "title" => "x".repeat(65) })
            .expect_err("invalid item must fail");

        assert_eq!(
            codes(err),
            vec![
                ("bogus".to_string(), "unknown_field"),
                ("title".to_string(), "max_length"),
                ("value".to_string(), "type"),
            ]
        );
        assert_eq!(counted.calls(), 0);
    }

    #[test]
    fn required_fields_with_defaults_may_be_omitted() {
        let ctx = context();
        let store = SchemaValidatingStore::new(Arc::new(MemoryStore::new(notes_meta(), &ctx)), &ctx);

        // `created` is stamped by its transform; `title` has no default
        let err = store.create(record! { "id" => "a" }).expect_err("title is required");
        assert_eq!(codes(err), vec![("title".to_string(), "required")]);

        let stored = store.create(note("a", 1)).expect("valid item should persist");
        assert!(stored.contains_key("created"));
    }

    #[test]
    fn invalid_updates_return_none() {
        let ctx = context();
        let store = SchemaValidatingStore::new(Arc::new(MemoryStore::new(notes_meta(), &ctx)), &ctx);
        store.create(note("a", 1)).expect("create should succeed");

        assert_eq!(
            store
                .update(record! { "id" => "a", "title" => Value::Null }, &SearchFilter::IncludeAll)
                .expect("update should run"),
            None
        );
        assert_eq!(
            store
                .update(record! { "id" => "a", "value" => true }, &SearchFilter::IncludeAll)
                .expect("update should run"),
            None
        );
        let updated = store
            .update(record! { "id" => "a", "value" => 2 }, &SearchFilter::IncludeAll)
            .expect("update should run")
            .expect("valid update applies");
        assert_eq!(updated.value("value"), &Value::Int(2));
    }

    #[test]
    fn updates_are_checked_after_dropping_fixed_fields() {
        let ctx = context();
        let store = SchemaValidatingStore::new(Arc::new(MemoryStore::new(notes_meta(), &ctx)), &ctx);
        let stored = store.create(note("a", 1)).expect("create should succeed");

        // `created` is immutable, so its bad value never reaches the row
        let updated = store
            .update(
                record! { "id" => "a", "created" => "yesterday", "value" => 3 },
                &SearchFilter::IncludeAll,
            )
            .expect("update should run")
            .expect("update applies");
        assert_eq!(updated.value("value"), &Value::Int(3));
        assert_eq!(updated.value("created"), stored.value("created"));

        assert_eq!(
            store
                .update(record! { "id" => "a", "bogus" => 1 }, &SearchFilter::IncludeAll)
                .expect("update should run"),
            None
        );
    }

    #[test]
    fn batch_failures_carry_the_schema_code() {
        let ctx = context();
        let store = SchemaValidatingStore::new(Arc::new(MemoryStore::new(notes_meta(), &ctx)), &ctx);

        let results = store
            .edit_batch(vec![
                BatchEdit::create(record! { "id" => "a" }),
                BatchEdit::create(note("b", 1)),
            ])
            .expect("batch should run");

        assert_eq!(results[0].code, Some("schema_validation"));
        assert!(results[1].success);
    }
}
