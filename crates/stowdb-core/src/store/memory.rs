//! Module: store::memory
//! Responsibility: in-process map-backed store with skip-forward paging.
//! Does not own: persistence; contents live only as long as the store.

use crate::{
    context::StoreContext,
    error::StoreError,
    filter::SearchFilter,
    model::StorageMeta,
    order::SearchOrder,
    record::Record,
    store::{ResultSet, Store, check_query, page::page_after_key},
};
use parking_lot::RwLock;
use std::collections::BTreeMap;

///
/// MemoryStore
///
/// Records keyed by their encoded key string. Concurrent creates of the
/// same key are serialized by the write lock: the first one wins.
///

pub struct MemoryStore {
    meta: StorageMeta,
    ctx: StoreContext,
    items: RwLock<BTreeMap<String, Record>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(meta: StorageMeta, ctx: &StoreContext) -> Self {
        Self {
            meta,
            ctx: ctx.clone(),
            items: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn matching(&self, filter: &SearchFilter) -> Vec<Record> {
        let fields = self.meta.fields();
        self.items
            .read()
            .values()
            .filter(|record| filter.matches(record, fields))
            .cloned()
            .collect()
    }
}

impl Store for MemoryStore {
    fn meta(&self) -> &StorageMeta {
        &self.meta
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        let record = self.meta.prepare_create(&item, self.ctx.now());
        let key = self.meta.key_of(&record)?;

        let mut items = self.items.write();
        if items.contains_key(&key) {
            return Err(StoreError::duplicate_key(self.meta.name(), key));
        }
        items.insert(key, record.clone());

        Ok(record)
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.items.read().get(key).cloned())
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        let items = self.items.read();
        Ok(keys.iter().map(|key| items.get(key).cloned()).collect())
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        precondition.validate_for_fields(self.meta.fields())?;
        let key = self.meta.key_of(&updates)?;

        let mut items = self.items.write();
        let Some(existing) = items.get(&key) else {
            return Ok(None);
        };
        if !precondition.matches(existing, self.meta.fields()) {
            return Ok(None);
        }

        let merged = self.meta.prepare_update(existing, &updates, self.ctx.now());
        items.insert(key, merged.clone());

        Ok(Some(merged))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.items.write().remove(key).is_some())
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        check_query(&self.meta, filter, &SearchOrder::none())?;
        if filter.is_exclude_all() {
            return Ok(0);
        }

        Ok(self.matching(filter).len() as u64)
    }

    fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<Record>, StoreError> {
        check_query(&self.meta, filter, order)?;
        let limit = self.meta.resolve_limit(limit)?;
        if filter.is_exclude_all() {
            return Ok(ResultSet::empty());
        }

        // map iteration is key order, and the sort is stable, so ties stay in key order
        let mut records = self.matching(filter);
        order.sort_records(&mut records, |_, _| std::cmp::Ordering::Equal);

        page_after_key(
            records,
            |record| self.meta.key_of(record).ok(),
            filter,
            order,
            page_key,
            limit,
        )
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("record", &self.meta.name())
            .field("items", &self.len())
            .finish()
    }
}
