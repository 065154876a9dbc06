//! Stores assembled from configuration, exercised through the public API only.

use chrono::{DateTime, Utc};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use stowdb::{
    Error, assemble,
    config::StowConfig,
    configure_meta,
    core::{
        context::{ManualClock, StoreContext},
        model::WriteTransform,
        store::{
            MemoryStore,
            sql::{SqlTableStore, SqliteConnection},
        },
        trigger::{InlineDispatcher, TriggerKind, TriggerRegistry},
    },
    prelude::*,
    record,
};

const CONFIG: &str = r#"
[stores.notes]
batch_size = 3
cache_ttl_secs = 10
exclude_fields = ["secret"]
validate_schema = true
dispatch_triggers = true

[stores.archive]
readonly = true
"#;

const NOTES_DDL: &str = "CREATE TABLE notes (
    id TEXT PRIMARY KEY,
    title TEXT,
    value INTEGER,
    secret TEXT,
    created INTEGER
);";

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

fn meta(name: &str) -> StorageMeta {
    StorageMeta::builder(name)
        .field(Field::new("id", FieldKind::Text).required().immutable())
        .field(Field::new("title", FieldKind::Text).required().max_length(32))
        .field(Field::new("value", FieldKind::Int))
        .field(Field::new("secret", FieldKind::Text))
        .field(Field::new("created", FieldKind::Timestamp).with_transform(WriteTransform::CreatedAt))
        .build()
        .expect("schema should build")
}

fn context(triggers: Arc<TriggerRegistry>) -> (StoreContext, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let ctx = StoreContext::new()
        .with_clock(clock.clone())
        .with_triggers(triggers)
        .with_dispatcher(Arc::new(InlineDispatcher));

    (ctx, clock)
}

fn note(id: &str, value: i64) -> Record {
    record! { "id" => id, "title" => format!("note {id}"), "value" => value }
}

fn sql_base(meta: StorageMeta, ctx: &StoreContext) -> Arc<dyn Store> {
    let conn = SqliteConnection::open_in_memory().expect("sqlite should open");
    conn.execute_batch(NOTES_DDL).expect("table should be created");

    Arc::new(SqlTableStore::sqlite(meta, Arc::new(conn), ctx))
}

#[test]
fn configured_sql_store_runs_the_whole_chain() {
    let config = StowConfig::from_toml_str(CONFIG).expect("config should parse");
    let settings = config.store("notes");

    let created = Arc::new(AtomicUsize::new(0));
    let triggers = Arc::new(TriggerRegistry::new());
    let counter = Arc::clone(&created);
    triggers.register_fn("notes", TriggerKind::Created, "count", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let (ctx, _) = context(triggers);

    let base = sql_base(configure_meta(&meta("notes"), &settings), &ctx);
    let store = assemble(base.clone(), &settings, &ctx).expect("chain should assemble");

    for idx in 1..=5 {
        store.create(note(&format!("n{idx}"), idx)).expect("create should succeed");
    }
    assert_eq!(created.load(Ordering::SeqCst), 5);

    // schema validation sees the excluded view
    let err = store
        .create(note("x", 1).with("secret", "s"))
        .expect_err("excluded field must be refused");
    assert_eq!(err.code(), "schema_validation");
    let err = store
        .create(record! { "id" => "y", "title" => "t".repeat(33) })
        .expect_err("title is too long");
    assert_eq!(err.code(), "schema_validation");

    // batch size comes from the section
    let err = store
        .search(&SearchFilter::IncludeAll, &SearchOrder::none(), None, Some(4))
        .expect_err("limit above configured batch size");
    assert_eq!(err.code(), "limit_exceeded");

    let filter = SearchFilter::gte("value", 3);
    let order = SearchOrder::desc("value");
    let first = store.search(&filter, &order, None, Some(2)).expect("first page");
    let second = store
        .search(&filter, &order, first.next_page_key.as_deref(), Some(2))
        .expect("second page");
    let ids: Vec<Value> = first
        .results
        .iter()
        .chain(&second.results)
        .map(|item| item.value("id").clone())
        .collect();
    assert_eq!(ids, vec![Value::from("n5"), Value::from("n4"), Value::from("n3")]);
    assert!(second.next_page_key.is_none());
}

#[test]
fn cached_counts_expire_with_the_configured_ttl() {
    let config = StowConfig::from_toml_str(CONFIG).expect("config should parse");
    let settings = config.store("notes");
    let (ctx, clock) = context(Arc::new(TriggerRegistry::new()));

    let base: Arc<dyn Store> = Arc::new(MemoryStore::new(configure_meta(&meta("notes"), &settings), &ctx));
    let store = assemble(base.clone(), &settings, &ctx).expect("chain should assemble");

    store.create(note("a", 1)).expect("create should succeed");
    assert_eq!(store.count(&SearchFilter::IncludeAll).expect("count"), 1);

    base.create(note("b", 2)).expect("out-of-band create");
    assert_eq!(store.count(&SearchFilter::IncludeAll).expect("count"), 1);

    clock.advance(chrono::Duration::seconds(10));
    assert_eq!(store.count(&SearchFilter::IncludeAll).expect("count"), 2);
    assert_eq!(settings.cache_ttl(), Some(Duration::from_secs(10)));
}

#[test]
fn readonly_sections_refuse_writes() {
    let config = StowConfig::from_toml_str(CONFIG).expect("config should parse");
    let settings = config.store("archive");
    let (ctx, _) = context(Arc::new(TriggerRegistry::new()));

    let base: Arc<dyn Store> = Arc::new(MemoryStore::new(configure_meta(&meta("archive"), &settings), &ctx));
    base.create(note("a", 1)).expect("seed through the base store");
    let store = assemble(base, &settings, &ctx).expect("chain should assemble");

    assert!(store.read("a").expect("read is allowed").is_some());
    assert_eq!(
        store.create(note("b", 1)).expect_err("create is refused").code(),
        "unavailable_operation"
    );
    let results = store
        .edit_batch(vec![BatchEdit::delete("a")])
        .expect("batch should run");
    assert_eq!(results[0].code, Some("unavailable_operation"));
    assert!(!store.meta().access().creatable);
}

#[test]
fn excluding_a_key_field_is_a_meta_error() {
    let config = StowConfig::from_toml_str("[stores.notes]\nexclude_fields = [\"id\"]\n").expect("config should parse");
    let (ctx, _) = context(Arc::new(TriggerRegistry::new()));
    let base: Arc<dyn Store> = Arc::new(MemoryStore::new(meta("notes"), &ctx));

    let err = assemble(base, &config.store("notes"), &ctx).err();

    assert!(matches!(err, Some(Error::Meta(_))));
}
