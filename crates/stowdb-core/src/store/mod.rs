//! Module: store
//! Responsibility: the store contract shared by base stores and wrappers,
//! plus its pagination and batch helpers.
//! Does not own: filter semantics (see `filter`) or native translation (see `pushdown`).
//! Boundary: every store speaks in generic `Record`s and string keys.

pub mod batch;
pub mod memory;
pub mod page;
pub mod result;
pub mod sql;
pub mod wide;


use crate::{
    error::StoreError,
    filter::SearchFilter,
    model::StorageMeta,
    order::SearchOrder,
    record::Record,
};
use std::collections::VecDeque;

pub use batch::{BatchEdit, BatchEditResult, EditOp};
pub use memory::MemoryStore;
pub use page::{PageKey, PageKeyError, PagePosition};
pub use result::ResultSet;

///
/// Store
///
/// Uniform CRUD + search + batch contract. Every operation is atomic at
/// the call boundary; no multi-call transactions are exposed.
///

pub trait Store: Send + Sync {
    fn meta(&self) -> &StorageMeta;

    /// Apply create transforms, derive the key, and persist.
    fn create(&self, item: Record) -> Result<Record, StoreError>;

    /// `None` when the key is absent; never an error for a missing key.
    fn read(&self, key: &str) -> Result<Option<Record>, StoreError>;

    /// One slot per key, aligned with `keys`.
    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        keys.iter().map(|key| self.read(key)).collect()
    }

    /// Merge updatable fields into the existing item. `None` when the item is
    /// absent or `precondition` does not match it.
    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError>;

    /// `false` when the key was absent.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        count_by_scan(self, filter)
    }

    fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<Record>, StoreError>;

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> Result<Vec<BatchEditResult>, StoreError> {
        batch::edit_sequentially(self, edits)
    }
}

/// Count by streaming every matching page.
pub fn count_by_scan<S>(store: &S, filter: &SearchFilter) -> Result<u64, StoreError>
where
    S: Store + ?Sized,
{
    let mut count = 0u64;
    for item in store.search_all(filter.clone(), SearchOrder::none()) {
        item?;
        count += 1;
    }

    Ok(count)
}

/// Validate a filter and order against `meta` before touching a backend.
pub(crate) fn check_query(meta: &StorageMeta, filter: &SearchFilter, order: &SearchOrder) -> Result<(), StoreError> {
    filter.validate_for_fields(meta.fields())?;
    order.validate_for_fields(meta.fields())?;

    Ok(())
}

///
/// StoreExt
///
/// Helpers built purely on the [`Store`] contract.
///

pub trait StoreExt: Store {
    /// Lazily walk every page of a search. Abandoning the iterator stops
    /// further page fetches.
    fn search_all(&self, filter: SearchFilter, order: SearchOrder) -> SearchAll<'_, Self> {
        SearchAll {
            store: self,
            filter,
            order,
            buffer: VecDeque::new(),
            next_page_key: None,
            done: false,
        }
    }

    /// Apply any number of edits, chunked by the schema batch size.
    fn edit_all<I>(&self, edits: I) -> Result<Vec<BatchEditResult>, StoreError>
    where
        I: IntoIterator<Item = BatchEdit>,
    {
        let size = self.meta().batch_size();
        let mut results = Vec::new();
        let mut chunk = Vec::with_capacity(size);
        for edit in edits {
            chunk.push(edit);
            if chunk.len() == size {
                results.extend(self.edit_batch(std::mem::take(&mut chunk))?);
            }
        }
        if !chunk.is_empty() {
            results.extend(self.edit_batch(chunk)?);
        }

        Ok(results)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

///
/// SearchAll
///

pub struct SearchAll<'a, S: ?Sized> {
    store: &'a S,
    filter: SearchFilter,
    order: SearchOrder,
    buffer: VecDeque<Record>,
    next_page_key: Option<String>,
    done: bool,
}

impl<S: Store + ?Sized> Iterator for SearchAll<'_, S> {
    type Item = Result<Record, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }

            let page = self.store.search(
                &self.filter,
                &self.order,
                self.next_page_key.as_deref(),
                None,
            );
            match page {
                Ok(page) => {
                    self.done = page.next_page_key.is_none();
                    self.next_page_key = page.next_page_key;
                    self.buffer.extend(page.results);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for SearchAll<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchAll")
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("buffered", &self.buffer.len())
            .field("done", &self.done)
            .finish()
    }
}
