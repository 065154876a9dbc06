//! Module: wrap::access
//! Responsibility: verb-level and item-level access checks in front of a store.
//! Does not own: the authorization scope model; callers hand in an opaque
//! `Authorization` and a factory turns it into an `AccessControl`.
//! Boundary: denied reads look like missing items, denied writes look like
//! no-ops, and only verb denials raise.

use crate::{
    error::{Operation, StoreError},
    filter::SearchFilter,
    model::{Field, StorageAccess, StorageMeta},
    order::SearchOrder,
    record::Record,
    store::{
        BatchEdit, BatchEditResult, ResultSet, Store, batch, check_query, count_by_scan,
    },
};
use std::{collections::BTreeSet, fmt, sync::Arc};

///
/// Authorization
///
/// Who is calling and which scopes they hold. Scope strings are opaque to
/// the core; factories decide what they mean.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Authorization {
    pub principal: String,
    pub scopes: BTreeSet<String>,
}

impl Authorization {
    pub fn new<I, S>(principal: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal: principal.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

///
/// AccessControl
///
/// Access rules for one caller against one record type.
///

pub trait AccessControl: Send + Sync {
    /// Verb grants, intersected with the schema's own.
    fn access(&self) -> StorageAccess;

    /// Filter selecting exactly the records `can_read` admits, or `None` when
    /// visibility cannot be written as a filter.
    fn read_filter(&self) -> Option<SearchFilter>;

    fn can_read(&self, item: &Record) -> bool;

    fn can_create(&self, item: &Record) -> bool;

    fn can_update(&self, existing: &Record, updates: &Record) -> bool;

    fn can_delete(&self, existing: &Record) -> bool;
}

///
/// AccessControlFactory
///

pub trait AccessControlFactory: Send + Sync {
    fn for_authorization(&self, auth: &Authorization, meta: &StorageMeta) -> Arc<dyn AccessControl>;
}

///
/// Visibility
///

#[derive(Clone)]
enum Visibility {
    Filter(SearchFilter),
    Predicate(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
}

///
/// AccessPolicy
///
/// Verb grants plus a row visibility rule. Writes are only allowed on rows
/// the caller can see, before and after the write.
///

#[derive(Clone)]
pub struct AccessPolicy {
    access: StorageAccess,
    visibility: Visibility,
    fields: Arc<[Field]>,
}

impl AccessPolicy {
    #[must_use]
    pub fn new(meta: &StorageMeta, access: StorageAccess) -> Self {
        Self {
            access,
            visibility: Visibility::Filter(SearchFilter::IncludeAll),
            fields: meta.fields().into(),
        }
    }

    /// Restrict visible rows to those matching `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.visibility = Visibility::Filter(filter);
        self
    }

    /// Restrict visible rows with a rule that has no filter form.
    /// Searches through such a policy are post-filtered per item.
    #[must_use]
    pub fn with_predicate(mut self, f: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.visibility = Visibility::Predicate(Arc::new(f));
        self
    }
}

impl AccessControl for AccessPolicy {
    fn access(&self) -> StorageAccess {
        self.access
    }

    fn read_filter(&self) -> Option<SearchFilter> {
        match &self.visibility {
            Visibility::Filter(filter) => Some(filter.clone()),
            Visibility::Predicate(_) => None,
        }
    }

    fn can_read(&self, item: &Record) -> bool {
        match &self.visibility {
            Visibility::Filter(filter) => filter.matches(item, &self.fields),
            Visibility::Predicate(f) => f(item),
        }
    }

    fn can_create(&self, item: &Record) -> bool {
        self.can_read(item)
    }

    fn can_update(&self, existing: &Record, updates: &Record) -> bool {
        let mut merged = existing.clone();
        merged.merge(updates);

        self.can_read(existing) && self.can_read(&merged)
    }

    fn can_delete(&self, existing: &Record) -> bool {
        self.can_read(existing)
    }
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visibility = match &self.visibility {
            Visibility::Filter(filter) => format!("{filter:?}"),
            Visibility::Predicate(_) => "Predicate(..)".to_string(),
        };
        f.debug_struct("AccessPolicy")
            .field("access", &self.access)
            .field("visibility", &visibility)
            .finish_non_exhaustive()
    }
}

///
/// FieldScopedAccess
///
/// Maps `<record>:<verb>` scopes to verb grants; `<record>:admin` grants
/// everything. With an owner field set, non-admin callers only see rows
/// whose owner field equals their principal.
///

#[derive(Clone, Debug, Default)]
pub struct FieldScopedAccess {
    owner_field: Option<String>,
}

impl FieldScopedAccess {
    #[must_use]
    pub const fn new() -> Self {
        Self { owner_field: None }
    }

    #[must_use]
    pub fn owned_by(field: impl Into<String>) -> Self {
        Self {
            owner_field: Some(field.into()),
        }
    }
}

impl AccessControlFactory for FieldScopedAccess {
    fn for_authorization(&self, auth: &Authorization, meta: &StorageMeta) -> Arc<dyn AccessControl> {
        let scope = |verb: &str| auth.has_scope(&format!("{}:{verb}", meta.name()));

        if scope("admin") {
            return Arc::new(AccessPolicy::new(meta, StorageAccess::ALL));
        }

        let access = StorageAccess {
            creatable: scope("create"),
            readable: scope("read"),
            updatable: scope("update"),
            deletable: scope("delete"),
            searchable: scope("search") || scope("read"),
        };
        let policy = AccessPolicy::new(meta, access);
        let policy = match &self.owner_field {
            Some(field) => policy.with_filter(SearchFilter::eq(field.as_str(), auth.principal.as_str())),
            None => policy,
        };

        Arc::new(policy)
    }
}

///
/// AccessControlStore
///
/// Outermost wrapper. Results leave through the schema's readable view.
///

pub struct AccessControlStore {
    inner: Arc<dyn Store>,
    meta: StorageMeta,
    control: Arc<dyn AccessControl>,
    /// Visibility filter the inner store accepts; `None` post-filters.
    pushdown: Option<SearchFilter>,
}

impl AccessControlStore {
    #[must_use]
    pub fn new(inner: Arc<dyn Store>, control: Arc<dyn AccessControl>) -> Self {
        let meta = inner.meta();
        let meta = meta.with_access(meta.access() & control.access());
        // a rule on a field the inner store cannot filter by (hidden, say)
        // is checked per item instead
        let pushdown = control
            .read_filter()
            .filter(|visible| visible.validate_for_fields(inner.meta().fields()).is_ok());

        Self {
            inner,
            meta,
            control,
            pushdown,
        }
    }

    fn require(&self, operation: Operation) -> Result<(), StoreError> {
        if self.meta.access().allows(operation) {
            Ok(())
        } else {
            Err(StoreError::unavailable(self.meta.name(), operation))
        }
    }

    fn visible(&self, item: Option<Record>) -> Option<Record> {
        item.filter(|item| self.control.can_read(item))
            .map(|item| self.meta.readable_view(item))
    }

    // item-level visibility only; the read verb is checked by the callers that need it
    fn visible_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        Ok(self
            .inner
            .read_batch(keys)?
            .into_iter()
            .map(|item| self.visible(item))
            .collect())
    }

    // full pre-image, so rules can see fields the caller cannot
    fn pre_image(&self, key: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .inner
            .read(key)?
            .filter(|item| self.control.can_read(item)))
    }
}

impl Store for AccessControlStore {
    fn meta(&self) -> &StorageMeta {
        &self.meta
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        self.require(Operation::Create)?;
        if !self.control.can_create(&item) {
            return Err(StoreError::unavailable(self.meta.name(), Operation::Create));
        }

        let stored = self.inner.create(item)?;

        Ok(self.meta.readable_view(stored))
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.require(Operation::Read)?;

        Ok(self.visible(self.inner.read(key)?))
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        self.require(Operation::Read)?;

        self.visible_batch(keys)
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        self.require(Operation::Update)?;
        let key = self.meta.key_of(&updates)?;

        let Some(existing) = self.pre_image(&key)? else {
            return Ok(None);
        };
        if !self.control.can_update(&existing, &updates) {
            tracing::debug!(record = self.meta.name(), key = %key, "update denied");
            return Ok(None);
        }

        Ok(self
            .inner
            .update(updates, precondition)?
            .map(|item| self.meta.readable_view(item)))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.require(Operation::Delete)?;

        let Some(existing) = self.pre_image(key)? else {
            return Ok(false);
        };
        if !self.control.can_delete(&existing) {
            tracing::debug!(record = self.meta.name(), key = %key, "delete denied");
            return Ok(false);
        }

        self.inner.delete(key)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        self.require(Operation::Search)?;
        check_query(&self.meta, filter, &SearchOrder::none())?;

        match &self.pushdown {
            Some(visible) => {
                let combined = filter.clone() & visible.clone();
                if combined.is_exclude_all() {
                    return Ok(0);
                }
                self.inner.count(&combined)
            }
            None => count_by_scan(self, filter),
        }
    }

    fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<Record>, StoreError> {
        self.require(Operation::Search)?;
        check_query(&self.meta, filter, order)?;
        let limit = self.meta.resolve_limit(limit)?;

        let page = match &self.pushdown {
            Some(visible) => {
                let combined = filter.clone() & visible.clone();
                if combined.is_exclude_all() {
                    return Ok(ResultSet::empty());
                }
                self.inner.search(&combined, order, page_key, Some(limit))?
            }
            None => {
                let mut page = self.inner.search(filter, order, page_key, Some(limit))?;
                page.results.retain(|item| self.control.can_read(item));
                page
            }
        };

        Ok(page.map(|item| self.meta.readable_view(item)))
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> Result<Vec<BatchEditResult>, StoreError> {
        batch::edit_sequentially_with(self, edits, |keys| self.visible_batch(keys))
    }
}

impl fmt::Debug for AccessControlStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessControlStore")
            .field("record", &self.meta.name())
            .field("access", &self.meta.access())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::MemoryStore,
        test_support::{CountingStore, context, ids, note, notes_meta},
        value::Value,
    };

    fn seeded() -> Arc<MemoryStore> {
        let base = Arc::new(MemoryStore::new(notes_meta(), &context()));
        for (id, owner) in [("a", "ann"), ("b", "bob"), ("c", "ann")] {
            base.create(note(id, 1).with("tag", owner).with("secret", "s3cret"))
                .expect("seed create should succeed");
        }
        base
    }

    fn owned_by(who: &str) -> AccessPolicy {
        AccessPolicy::new(&notes_meta(), StorageAccess::ALL).with_filter(SearchFilter::eq("tag", who))
    }

    #[test]
    fn verb_grants_raise_unavailable_operation() {
        let store = AccessControlStore::new(
            seeded(),
            Arc::new(AccessPolicy::new(&notes_meta(), StorageAccess::READ_ONLY)),
        );

        assert!(store.read("a").expect("read is granted").is_some());
        let err = store.create(note("z", 1)).expect_err("create is not granted");
        assert_eq!(err.code(), "unavailable_operation");
        assert_eq!(store.delete("a").expect_err("delete is not granted").code(), "unavailable_operation");
        assert!(!store.meta().access().updatable);
    }

    #[test]
    fn item_rules_hide_reads_and_ignore_writes() {
        let base = seeded();
        let store = AccessControlStore::new(base.clone(), Arc::new(owned_by("ann")));

        assert_eq!(store.read("b").expect("read should run"), None);
        assert_eq!(
            store
                .update(record! { "id" => "b", "value" => 9 }, &SearchFilter::IncludeAll)
                .expect("update should run"),
            None
        );
        assert!(!store.delete("b").expect("delete should run"));
        assert_eq!(base.read("b").expect("read").map(|r| r.value("value").clone()), Some(Value::Int(1)));

        // moving a row out of sight counts as a denied update
        assert_eq!(
            store
                .update(record! { "id" => "a", "tag" => "bob" }, &SearchFilter::IncludeAll)
                .expect("update should run"),
            None
        );

        let err = store
            .create(note("z", 1).with("tag", "bob"))
            .expect_err("creating an invisible row is denied");
        assert_eq!(err.code(), "unavailable_operation");
    }

    #[test]
    fn results_drop_hidden_fields() {
        let store = AccessControlStore::new(seeded(), Arc::new(owned_by("ann")));

        let item = store.read("a").expect("read should run").expect("item is visible");
        assert!(!item.contains_key("secret"));

        let page = store
            .search(&SearchFilter::IncludeAll, &SearchOrder::asc("id"), None, None)
            .expect("search should run");
        assert_eq!(ids(&page), vec!["a", "c"]);
        assert!(page.results.iter().all(|item| !item.contains_key("secret")));
        assert_eq!(store.count(&SearchFilter::IncludeAll).expect("count"), 2);
    }

    #[test]
    fn exclude_all_policy_never_reaches_inner_store() {
        let counted = Arc::new(CountingStore::new(seeded()));
        let policy = AccessPolicy::new(&notes_meta(), StorageAccess::ALL).with_filter(SearchFilter::ExcludeAll);
        let store = AccessControlStore::new(counted.clone(), Arc::new(policy));

        let page = store
            .search(&SearchFilter::eq("value", 1), &SearchOrder::none(), None, None)
            .expect("search should run");
        assert!(page.is_empty());
        assert_eq!(store.count(&SearchFilter::IncludeAll).expect("count"), 0);
        assert_eq!(counted.calls(), 0);
    }

    #[test]
    fn policies_on_hidden_fields_scope_instead_of_failing() {
        let base = seeded();
        base.create(note("d", 1).with("tag", "ann").with("secret", "other"))
            .expect("seed create should succeed");
        let policy =
            AccessPolicy::new(&notes_meta(), StorageAccess::ALL).with_filter(SearchFilter::eq("secret", "s3cret"));
        let store = AccessControlStore::new(base, Arc::new(policy));

        let page = store
            .search(&SearchFilter::eq("tag", "ann"), &SearchOrder::asc("id"), None, None)
            .expect("search should run");
        assert_eq!(ids(&page), vec!["a", "c"]);
        assert!(page.results.iter().all(|item| !item.contains_key("secret")));
        assert_eq!(store.count(&SearchFilter::IncludeAll).expect("count"), 3);
        assert_eq!(store.read("d").expect("read should run"), None);
    }

    #[test]
    fn predicate_policies_post_filter_each_page() {
        let policy = AccessPolicy::new(&notes_meta(), StorageAccess::ALL)
            .with_predicate(|item| item.value("tag") == &Value::from("ann"));
        let store = AccessControlStore::new(seeded(), Arc::new(policy));

        let first = store
            .search(&SearchFilter::IncludeAll, &SearchOrder::asc("id"), None, Some(2))
            .expect("first page");
        assert_eq!(ids(&first), vec!["a"]);
        let second = store
            .search(&SearchFilter::IncludeAll, &SearchOrder::asc("id"), first.next_page_key.as_deref(), Some(2))
            .expect("second page");
        assert_eq!(ids(&second), vec!["c"]);
        assert_eq!(store.count(&SearchFilter::IncludeAll).expect("count"), 2);
    }

    #[test]
    fn batches_admit_against_visible_rows() {
        let store = AccessControlStore::new(seeded(), Arc::new(owned_by("ann")));

        let results = store
            .edit_batch(vec![
                BatchEdit::delete("b"),
                BatchEdit::delete("c"),
                BatchEdit::create(note("d", 1).with("tag", "bob")),
            ])
            .expect("batch should run");
        let codes: Vec<Option<&str>> = results.iter().map(|r| r.code).collect();

        assert_eq!(codes, vec![Some("missing_key"), None, Some("unavailable_operation")]);
    }

    #[test]
    fn scopes_map_to_verbs_and_ownership() {
        let factory = FieldScopedAccess::owned_by("tag");
        let meta = notes_meta();

        let reader = factory.for_authorization(&Authorization::new("ann", ["notes:read"]), &meta);
        assert_eq!(reader.access(), StorageAccess::READ_ONLY);
        assert_eq!(reader.read_filter(), Some(SearchFilter::eq("tag", "ann")));

        let admin = factory.for_authorization(&Authorization::new("root", ["notes:admin"]), &meta);
        assert_eq!(admin.access(), StorageAccess::ALL);
        assert_eq!(admin.read_filter(), Some(SearchFilter::IncludeAll));

        let stranger = factory.for_authorization(&Authorization::new("eve", ["tasks:admin"]), &meta);
        assert_eq!(stranger.access(), StorageAccess::NONE);
    }
}
