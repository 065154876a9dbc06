//! Module: wrap::trigger
//! Responsibility: fire registered handlers after successful writes.
//! Does not own: handler execution (see `trigger`); dispatch is
//! fire-and-forget and never changes the write's outcome.

use crate::{
    context::StoreContext,
    error::StoreError,
    filter::SearchFilter,
    model::StorageMeta,
    order::SearchOrder,
    record::Record,
    store::{BatchEdit, BatchEditResult, EditOp, ResultSet, Store},
    trigger::{TriggerEvent, TriggerKind},
};
use std::{fmt, sync::Arc};

///
/// TriggerStore
///

pub struct TriggerStore {
    inner: Arc<dyn Store>,
    ctx: StoreContext,
}

impl TriggerStore {
    #[must_use]
    pub fn new(inner: Arc<dyn Store>, ctx: &StoreContext) -> Self {
        Self {
            inner,
            ctx: ctx.clone(),
        }
    }

    fn fire(&self, kind: TriggerKind, key: String, item: Option<&Record>) {
        let record = self.meta().name();
        let handlers = self.ctx.triggers().find_handlers(record, kind);
        if handlers.is_empty() {
            return;
        }

        tracing::debug!(record, kind = %kind, key = %key, handlers = handlers.len(), "dispatching triggers");
        let event = TriggerEvent {
            record: record.to_string(),
            kind,
            key,
            item: item.cloned(),
        };
        for handler in handlers {
            self.ctx.dispatcher().dispatch(handler, event.clone());
        }
    }

    fn fire_stored(&self, kind: TriggerKind, item: &Record) {
        if let Ok(key) = self.meta().key_of(item) {
            self.fire(kind, key, Some(item));
        }
    }
}

impl Store for TriggerStore {
    fn meta(&self) -> &StorageMeta {
        self.inner.meta()
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        let stored = self.inner.create(item)?;
        self.fire_stored(TriggerKind::Created, &stored);

        Ok(stored)
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.inner.read(key)
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        self.inner.read_batch(keys)
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        let updated = self.inner.update(updates, precondition)?;
        if let Some(item) = &updated {
            self.fire_stored(TriggerKind::Updated, item);
        }

        Ok(updated)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let deleted = self.inner.delete(key)?;
        if deleted {
            self.fire(TriggerKind::Deleted, key.to_string(), None);
        }

        Ok(deleted)
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

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> Result<Vec<BatchEditResult>, StoreError> {
        let results = self.inner.edit_batch(edits)?;

        for result in results.iter().filter(|result| result.success) {
            match &result.edit.op {
                EditOp::Create(item) => self.fire_stored(TriggerKind::Created, item),
                EditOp::Update(item) => self.fire_stored(TriggerKind::Updated, item),
                EditOp::Delete(key) => self.fire(TriggerKind::Deleted, key.clone(), None),
            }
        }

        Ok(results)
    }
}

impl fmt::Debug for TriggerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerStore")
            .field("record", &self.meta().name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryStore,
        test_support::{clocked_context, note, notes_meta},
        trigger::{TriggerError, TriggerRegistry},
    };
    use parking_lot::Mutex;

    fn recording() -> (StoreContext, Arc<Mutex<Vec<(TriggerKind, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(TriggerRegistry::new());
        for kind in [TriggerKind::Created, TriggerKind::Updated, TriggerKind::Deleted] {
            let seen = Arc::clone(&seen);
            registry.register_fn("notes", kind, "record", move |event| {
                seen.lock().push((event.kind, event.key.clone()));
                Ok(())
            });
        }
        registry.register_fn("notes", TriggerKind::Created, "fails", |_| {
            Err(TriggerError::new("fails", "downstream is down"))
        });

        let (ctx, _) = clocked_context();
        (ctx.with_triggers(registry), seen)
    }

    #[test]
    fn successful_writes_fire_and_failures_stay_silent() {
        let (ctx, seen) = recording();
        let store = TriggerStore::new(Arc::new(MemoryStore::new(notes_meta(), &ctx)), &ctx);

        store.create(note("a", 1)).expect("failing handler must not fail the write");
        store
            .update(record! { "id" => "a", "value" => 2 }, &SearchFilter::IncludeAll)
            .expect("update should run");
        store
            .update(record! { "id" => "a", "value" => 3 }, &SearchFilter::gt("value", 5))
            .expect("update should run");
        assert!(!store.delete("ghost").expect("delete should run"));
        assert!(store.delete("a").expect("delete should run"));

        assert_eq!(
            *seen.lock(),
            vec![
                (TriggerKind::Created, "a".to_string()),
                (TriggerKind::Updated, "a".to_string()),
                (TriggerKind::Deleted, "a".to_string()),
            ]
        );
    }

    #[test]
    fn batches_fire_for_successful_items_only() {
        let (ctx, seen) = recording();
        let store = TriggerStore::new(Arc::new(MemoryStore::new(notes_meta(), &ctx)), &ctx);
        store.create(note("a", 1)).expect("create should succeed");
        seen.lock().clear();

        store
            .edit_batch(vec![
                BatchEdit::create(note("a", 1)),
                BatchEdit::create(note("b", 1)),
                BatchEdit::update(record! { "id" => "a", "value" => 4 }),
                BatchEdit::delete("zz"),
            ])
            .expect("batch should run");

        assert_eq!(
            *seen.lock(),
            vec![
                (TriggerKind::Created, "b".to_string()),
                (TriggerKind::Updated, "a".to_string()),
            ]
        );
    }
}
