//! Module: wrap::cache
//! Responsibility: TTL caching of single items, search pages and counts.
//! Does not own: invalidation across processes; entries only expire by TTL,
//! by a write through this store, or by `clear()`.
//! Boundary: search and count entries are not invalidated by single-item
//! writes, so they can lag the inner store for up to one TTL.

use crate::{
    context::StoreContext,
    error::StoreError,
    filter::{SearchFilter, write_str, write_tag},
    model::{CacheControl, StorageMeta},
    order::SearchOrder,
    record::Record,
    store::{BatchEdit, BatchEditResult, EditOp, ResultSet, Store},
};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{borrow::Borrow, collections::HashMap, fmt, hash::Hash, sync::Arc, time::Duration};

type Fingerprint = [u8; 32];

// Size at which an insert first sweeps expired entries out of its map.
const SWEEP_THRESHOLD: usize = 256;

fn finish(hasher: Sha256) -> Fingerprint {
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

///
/// Entry
///

#[derive(Clone, Debug)]
struct Entry<T> {
    value: T,
    expires: DateTime<Utc>,
}

impl<T> Entry<T> {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }
}

// Fresh value under `key`; an expired entry is removed.
fn lookup<K, Q, T>(map: &Mutex<HashMap<K, Entry<T>>>, key: &Q, now: DateTime<Utc>) -> Option<T>
where
    K: Borrow<Q> + Eq + Hash,
    Q: Eq + Hash + ?Sized,
    T: Clone,
{
    let mut map = map.lock();
    if map.get(key).is_some_and(|entry| !entry.is_fresh(now)) {
        map.remove(key);
    }

    map.get(key).map(|entry| entry.value.clone())
}

fn insert<K, T>(map: &Mutex<HashMap<K, Entry<T>>>, key: K, entry: Entry<T>, now: DateTime<Utc>)
where
    K: Eq + Hash,
{
    let mut map = map.lock();
    if map.len() >= SWEEP_THRESHOLD {
        map.retain(|_, entry| entry.is_fresh(now));
    }
    map.insert(key, entry);
}

///
/// CachedPage
///

#[derive(Clone, Debug)]
struct CachedPage {
    keys: Vec<String>,
    next_page_key: Option<String>,
}

///
/// CachingStore
///

pub struct CachingStore {
    inner: Arc<dyn Store>,
    ctx: StoreContext,
    control: CacheControl,
    items: Mutex<HashMap<String, Entry<Record>>>,
    results: Mutex<HashMap<Fingerprint, Entry<CachedPage>>>,
    counts: Mutex<HashMap<Fingerprint, Entry<u64>>>,
}

impl CachingStore {
    /// Cache using the schema's own cache control.
    #[must_use]
    pub fn new(inner: Arc<dyn Store>, ctx: &StoreContext) -> Self {
        let control = inner.meta().cache_control();

        Self::with_control(inner, control, ctx)
    }

    #[must_use]
    pub fn with_ttl(inner: Arc<dyn Store>, ttl: Duration, ctx: &StoreContext) -> Self {
        Self::with_control(inner, CacheControl { cacheable: true, ttl }, ctx)
    }

    #[must_use]
    pub fn with_control(inner: Arc<dyn Store>, control: CacheControl, ctx: &StoreContext) -> Self {
        Self {
            inner,
            ctx: ctx.clone(),
            control,
            items: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.items.lock().clear();
        self.results.lock().clear();
        self.counts.lock().clear();
    }

    fn expiry(&self) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.control.ttl).unwrap_or(TimeDelta::MAX);

        self.ctx
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn put_item(&self, item: &Record) {
        if let Ok(key) = self.meta().key_of(item) {
            let entry = Entry {
                value: item.clone(),
                expires: self.expiry(),
            };
            insert(&self.items, key, entry, self.ctx.now());
        }
    }

    fn forget_item(&self, key: &str) {
        self.items.lock().remove(key);
    }

    fn cached_item(&self, key: &str) -> Option<Record> {
        lookup(&self.items, key, self.ctx.now())
    }

    fn search_fingerprint(
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Fingerprint {
        let mut hasher = Sha256::new();
        filter.fingerprint(&mut hasher);
        order.fingerprint(&mut hasher);
        match page_key {
            Some(token) => {
                write_tag(&mut hasher, 1);
                write_str(&mut hasher, token);
            }
            None => write_tag(&mut hasher, 0),
        }
        hasher.update((limit.unwrap_or(0) as u64).to_be_bytes());

        finish(hasher)
    }

    fn count_fingerprint(filter: &SearchFilter) -> Fingerprint {
        let mut hasher = Sha256::new();
        filter.fingerprint(&mut hasher);

        finish(hasher)
    }

    // rebuild a cached page; items that vanished since are skipped
    fn hydrate(&self, page: CachedPage) -> Result<ResultSet<Record>, StoreError> {
        let mut slots: Vec<Option<Record>> = page.keys.iter().map(|key| self.cached_item(key)).collect();

        let missing: Vec<String> = page
            .keys
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(key, _)| key.clone())
            .collect();
        if !missing.is_empty() {
            let mut fetched = self.inner.read_batch(&missing)?.into_iter();
            for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
                *slot = fetched.next().flatten();
                if let Some(item) = slot.as_ref() {
                    self.put_item(item);
                }
            }
        }

        Ok(ResultSet::new(slots.into_iter().flatten().collect(), page.next_page_key))
    }
}

impl Store for CachingStore {
    fn meta(&self) -> &StorageMeta {
        self.inner.meta()
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        let stored = self.inner.create(item)?;
        if self.control.cacheable {
            self.put_item(&stored);
        }

        Ok(stored)
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        if !self.control.cacheable {
            return self.inner.read(key);
        }
        if let Some(item) = self.cached_item(key) {
            tracing::debug!(record = self.meta().name(), key, "cache hit");
            return Ok(Some(item));
        }

        tracing::debug!(record = self.meta().name(), key, "cache miss");
        let item = self.inner.read(key)?;
        if let Some(item) = &item {
            self.put_item(item);
        }

        Ok(item)
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        if !self.control.cacheable {
            return self.inner.read_batch(keys);
        }

        let page = CachedPage {
            keys: keys.to_vec(),
            next_page_key: None,
        };
        let found = self.hydrate(page)?.results;

        // hydrate drops absent items; realign by key
        let by_key: HashMap<String, Record> = found
            .into_iter()
            .filter_map(|item| self.meta().key_of(&item).ok().map(|key| (key, item)))
            .collect();

        Ok(keys.iter().map(|key| by_key.get(key).cloned()).collect())
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        let key = self.meta().key_of(&updates).ok();
        let updated = self.inner.update(updates, precondition)?;

        if self.control.cacheable {
            match (&updated, key) {
                (Some(item), _) => self.put_item(item),
                (None, Some(key)) => self.forget_item(&key),
                (None, None) => {}
            }
        }

        Ok(updated)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let deleted = self.inner.delete(key)?;
        self.forget_item(key);

        Ok(deleted)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        if !self.control.cacheable {
            return self.inner.count(filter);
        }

        let fingerprint = Self::count_fingerprint(filter);
        let now = self.ctx.now();
        if let Some(count) = lookup(&self.counts, &fingerprint, now) {
            tracing::debug!(record = self.meta().name(), "count cache hit");
            return Ok(count);
        }

        let count = self.inner.count(filter)?;
        let entry = Entry {
            value: count,
            expires: self.expiry(),
        };
        insert(&self.counts, fingerprint, entry, now);

        Ok(count)
    }

    fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<Record>, StoreError> {
        if !self.control.cacheable {
            return self.inner.search(filter, order, page_key, limit);
        }

        let fingerprint = Self::search_fingerprint(filter, order, page_key, limit);
        let now = self.ctx.now();
        let cached = lookup(&self.results, &fingerprint, now);
        if let Some(page) = cached {
            tracing::debug!(record = self.meta().name(), items = page.keys.len(), "search cache hit");
            return self.hydrate(page);
        }

        let page = self.inner.search(filter, order, page_key, limit)?;
        let keys = page
            .results
            .iter()
            .filter_map(|item| self.meta().key_of(item).ok())
            .collect();
        for item in &page.results {
            self.put_item(item);
        }
        let entry = Entry {
            value: CachedPage {
                keys,
                next_page_key: page.next_page_key.clone(),
            },
            expires: self.expiry(),
        };
        insert(&self.results, fingerprint, entry, now);

        Ok(page)
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> Result<Vec<BatchEditResult>, StoreError> {
        let results = self.inner.edit_batch(edits)?;

        for result in results.iter().filter(|result| result.success) {
            match &result.edit.op {
                EditOp::Create(item) | EditOp::Update(item) if self.control.cacheable => self.put_item(item),
                EditOp::Delete(key) => self.forget_item(key),
                _ => {}
            }
        }

        Ok(results)
    }
}

impl fmt::Debug for CachingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingStore")
            .field("record", &self.meta().name())
            .field("control", &self.control)
            .field("items", &self.items.lock().len())
            .field("results", &self.results.lock().len())
            .field("counts", &self.counts.lock().len())
            .finish_non_exhaustive()
    }
}
