//! Module: wrap::exclude
//! Responsibility: present a store as if some of its fields did not exist.
//! Boundary: excluded fields never enter through inputs nor leave through
//! results; filters and orders that name them are invalid.

use crate::{
    error::{MetaError, StoreError},
    filter::SearchFilter,
    model::StorageMeta,
    order::SearchOrder,
    record::Record,
    store::{BatchEdit, BatchEditResult, EditOp, ResultSet, Store, check_query},
};
use std::{collections::BTreeSet, fmt, sync::Arc};

///
/// FieldExclusionStore
///

pub struct FieldExclusionStore {
    inner: Arc<dyn Store>,
    meta: StorageMeta,
    excluded: BTreeSet<String>,
}

impl FieldExclusionStore {
    /// Key fields cannot be excluded.
    pub fn new<I, S>(inner: Arc<dyn Store>, excluded: I) -> Result<Self, MetaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let excluded: BTreeSet<String> = excluded.into_iter().map(Into::into).collect();
        let meta = inner.meta().without_fields(&excluded)?;

        Ok(Self {
            inner,
            meta,
            excluded,
        })
    }

    #[must_use]
    pub const fn excluded(&self) -> &BTreeSet<String> {
        &self.excluded
    }

    fn strip(&self, record: Record) -> Record {
        record.retain_fields(|name| !self.excluded.contains(name))
    }

    fn strip_edit(&self, edit: BatchEdit) -> BatchEdit {
        let BatchEdit { id, op } = edit;
        let op = match op {
            EditOp::Create(item) => EditOp::Create(self.strip(item)),
            EditOp::Update(item) => EditOp::Update(self.strip(item)),
            delete @ EditOp::Delete(_) => delete,
        };

        BatchEdit::with_id(id, op)
    }
}

impl Store for FieldExclusionStore {
    fn meta(&self) -> &StorageMeta {
        &self.meta
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        let stored = self.inner.create(self.strip(item))?;

        Ok(self.strip(stored))
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.inner.read(key)?.map(|item| self.strip(item)))
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        Ok(self
            .inner
            .read_batch(keys)?
            .into_iter()
            .map(|item| item.map(|item| self.strip(item)))
            .collect())
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        precondition.validate_for_fields(self.meta.fields())?;

        Ok(self
            .inner
            .update(self.strip(updates), precondition)?
            .map(|item| self.strip(item)))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        check_query(&self.meta, filter, &SearchOrder::none())?;

        self.inner.count(filter)
    }

    fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<Record>, StoreError> {
        check_query(&self.meta, filter, order)?;

        Ok(self
            .inner
            .search(filter, order, page_key, limit)?
            .map(|item| self.strip(item)))
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> Result<Vec<BatchEditResult>, StoreError> {
        let edits = edits.into_iter().map(|edit| self.strip_edit(edit)).collect();
        let results = self.inner.edit_batch(edits)?;

        Ok(results
            .into_iter()
            .map(|result| BatchEditResult {
                edit: self.strip_edit(result.edit),
                ..result
            })
            .collect())
    }
}

impl fmt::Debug for FieldExclusionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldExclusionStore")
            .field("record", &self.meta.name())
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryStore,
        test_support::{context, note, notes_meta},
        value::Value,
    };

    fn split() -> (Arc<MemoryStore>, FieldExclusionStore) {
        let base = Arc::new(MemoryStore::new(notes_meta(), &context()));
        let store = FieldExclusionStore::new(base.clone(), ["tag"]).expect("tag is excludable");

        (base, store)
    }

    #[test]
    fn excluded_fields_never_reach_the_inner_store() {
        let (base, store) = split();

        let stored = store.create(note("a", 1).with("tag", "x")).expect("create should succeed");
        assert!(!stored.contains_key("tag"));
        assert!(!base.read("a").expect("read").expect("item exists").contains_key("tag"));

        let updated = store
            .update(record! { "id" => "a", "tag" => "y", "value" => 2 }, &SearchFilter::IncludeAll)
            .expect("update should run")
            .expect("item exists");
        assert_eq!(updated.value("value"), &Value::Int(2));
        assert!(!base.read("a").expect("read").expect("item exists").contains_key("tag"));
    }

    #[test]
    fn results_are_stripped_of_out_of_band_values() {
        let (base, store) = split();
        base.create(note("a", 1).with("tag", "x")).expect("create should succeed");

        assert!(!store.read("a").expect("read").expect("item exists").contains_key("tag"));
        let page = store
            .search(&SearchFilter::IncludeAll, &SearchOrder::none(), None, None)
            .expect("search should run");
        assert!(page.results.iter().all(|item| !item.contains_key("tag")));
    }

    #[test]
    fn queries_naming_excluded_fields_are_invalid() {
        let (_, store) = split();

        let err = store
            .search(&SearchFilter::eq("tag", "x"), &SearchOrder::none(), None, None)
            .expect_err("filter on excluded field must fail");
        assert_eq!(err.code(), "invalid_filter");

        let err = store
            .search(&SearchFilter::IncludeAll, &SearchOrder::asc("tag"), None, None)
            .expect_err("order on excluded field must fail");
        assert_eq!(err.code(), "invalid_filter");

        assert_eq!(store.count(&SearchFilter::eq("tag", "x")).expect_err("count").code(), "invalid_filter");
        assert!(store.meta().field("tag").is_none());
    }

    #[test]
    fn key_fields_cannot_be_excluded() {
        let base = Arc::new(MemoryStore::new(notes_meta(), &context()));

        assert!(FieldExclusionStore::new(base, ["id"]).is_err());
    }

    #[test]
    fn batch_items_are_stripped_both_ways() {
        let (_, store) = split();

        let results = store
            .edit_batch(vec![BatchEdit::create(note("a", 1).with("tag", "x"))])
            .expect("batch should run");
        let item = results[0].item().expect("create succeeded");

        assert!(!item.contains_key("tag"));
    }
}
