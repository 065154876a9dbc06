//! Shared fixtures for unit tests: one `notes` schema, a deterministic
//! context, and base stores over every backend.

use crate::{
    context::{ManualClock, StoreContext},
    error::StoreError,
    filter::SearchFilter,
    model::{Field, FieldKind, StorageMeta, WriteTransform},
    order::SearchOrder,
    pushdown::wide::WideIndex,
    record::Record,
    store::{
        BatchEdit, BatchEditResult, MemoryStore, ResultSet, Store,
        sql::{SqlTableStore, SqliteConnection},
        wide::{MemoryWideTable, WideColumnStore},
    },
    trigger::InlineDispatcher,
};
use chrono::{DateTime, Utc};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

pub(crate) const NOTES_DDL: &str = "CREATE TABLE notes (
    id TEXT PRIMARY KEY,
    title TEXT,
    value INTEGER,
    tag TEXT,
    secret TEXT,
    created INTEGER
);";

pub(crate) fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// id (key), title (required), value, tag, secret (hidden), created (stamped).
pub(crate) fn notes_meta() -> StorageMeta {
    StorageMeta::builder("notes")
        .field(Field::new("id", FieldKind::Text).required().immutable())
        .field(Field::new("title", FieldKind::Text).required().max_length(64))
        .field(Field::new("value", FieldKind::Int).indexed())
        .field(Field::new("tag", FieldKind::Text).indexed())
        .field(Field::new("secret", FieldKind::Text).hidden())
        .field(
            Field::new("created", FieldKind::Timestamp)
                .immutable()
                .with_transform(WriteTransform::CreatedAt),
        )
        .build()
        .expect("notes schema should build")
}

/// Manual clock, inline trigger dispatch.
pub(crate) fn clocked_context() -> (StoreContext, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let ctx = StoreContext::new()
        .with_clock(clock.clone())
        .with_dispatcher(Arc::new(InlineDispatcher));

    (ctx, clock)
}

pub(crate) fn context() -> StoreContext {
    clocked_context().0
}

pub(crate) fn note(id: &str, value: i64) -> Record {
    record! { "id" => id, "title" => format!("note {id}"), "value" => value }
}

pub(crate) fn memory_notes(ctx: &StoreContext) -> MemoryStore {
    MemoryStore::new(notes_meta(), ctx)
}

pub(crate) fn sql_notes(ctx: &StoreContext) -> SqlTableStore {
    let conn = SqliteConnection::open_in_memory().expect("sqlite should open");
    conn.execute_batch(NOTES_DDL).expect("notes table should be created");

    SqlTableStore::sqlite(notes_meta(), Arc::new(conn), ctx)
}

/// Table keyed by `id` with a keys-only secondary index on `tag`.
pub(crate) fn wide_notes(ctx: &StoreContext) -> WideColumnStore {
    let table = MemoryWideTable::new("id", None)
        .with_index(WideIndex::secondary("by_tag", "tag", Some("value".into()), false));

    WideColumnStore::new(notes_meta(), Arc::new(table), ctx).expect("wide store should build")
}

/// Every base backend over an empty `notes` table.
pub(crate) fn all_backends(ctx: &StoreContext) -> Vec<(&'static str, Box<dyn Store>)> {
    vec![
        ("memory", Box::new(memory_notes(ctx)) as Box<dyn Store>),
        ("sql", Box::new(sql_notes(ctx))),
        ("wide", Box::new(wide_notes(ctx))),
    ]
}

pub(crate) fn ids(page: &ResultSet<Record>) -> Vec<String> {
    page.results
        .iter()
        .filter_map(|record| record.value("id").as_text().map(str::to_string))
        .collect()
}

///
/// CountingStore
/// Pass-through store counting the data calls that reach it.
///

pub(crate) struct CountingStore {
    inner: Arc<dyn Store>,
    calls: AtomicUsize,
}

impl CountingStore {
    pub(crate) fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Store for CountingStore {
    fn meta(&self) -> &StorageMeta {
        self.inner.meta()
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        self.hit();
        self.inner.create(item)
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.hit();
        self.inner.read(key)
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        self.hit();
        self.inner.read_batch(keys)
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        self.hit();
        self.inner.update(updates, precondition)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.hit();
        self.inner.delete(key)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        self.hit();
        self.inner.count(filter)
    }

    fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<Record>, StoreError> {
        self.hit();
        self.inner.search(filter, order, page_key, limit)
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> Result<Vec<BatchEditResult>, StoreError> {
        self.hit();
        self.inner.edit_batch(edits)
    }
}
