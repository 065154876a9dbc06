//! Module: store::wide
//! Responsibility: store over one wide-column table and its secondary indexes.
//! Does not own: table provisioning; the table must already exist.
//! Boundary: a single-field key maps to the partition key; a two-field
//! composite key maps to partition + sort key. Native batch puts carry no
//! condition, so a batch create can overwrite an item written by another
//! client after the batch pre-read; single-item `create` reports
//! `duplicate_key` instead.

mod client;
mod memory;


pub use client::{
    ItemPage, MAX_BATCH_GET, MAX_BATCH_WRITE, PutCondition, QueryRequest, ScanRequest,
    TableDescription, WideColumnClient, WideError, WriteRequest,
};
pub use memory::MemoryWideTable;

use crate::{
    context::StoreContext,
    error::{BackendError, StoreError},
    filter::SearchFilter,
    model::StorageMeta,
    order::SearchOrder,
    pushdown::wide::{
        KeyCondition, WideCondition, WideConverterChain, WideIndex, WideScope, select_index,
        wide_converters,
    },
    record::Record,
    store::{
        BatchEdit, BatchEditResult, EditOp, PageKey, PageKeyError, PagePosition, ResultSet, Store,
        batch::{Admission, admit, apply_one},
        check_query, count_by_scan,
        page::page_after_key,
    },
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

// Rounds of retrying writes a batch call left unprocessed.
const UNPROCESSED_RETRIES: usize = 3;

impl From<WideError> for StoreError {
    fn from(err: WideError) -> Self {
        Self::Backend(BackendError::new("wide", err.to_string()))
    }
}

///
/// ReadPlan
/// How one search or count reaches the table.
///

#[derive(Debug)]
struct ReadPlan {
    key: Option<(WideIndex, KeyCondition)>,
    native: Option<WideCondition>,
    handled: bool,
    /// Index returns key attributes only; full items come from `batch_get`.
    keys_only: bool,
}

///
/// WideColumnStore
///
/// Filters push down as key conditions where a top-level equality names a
/// partition key, and as filter expressions otherwise. Pages resume from the
/// native start key when the table can produce the requested order, and by
/// skip-forward over an in-memory sort when it cannot.
///

pub struct WideColumnStore {
    meta: StorageMeta,
    ctx: StoreContext,
    client: Arc<dyn WideColumnClient>,
    description: TableDescription,
    indexes: Vec<WideIndex>,
    converters: WideConverterChain,
}

impl WideColumnStore {
    /// Bind `meta` to the table behind `client`; the table key must match
    /// the record key.
    pub fn new(meta: StorageMeta, client: Arc<dyn WideColumnClient>, ctx: &StoreContext) -> Result<Self, StoreError> {
        let description = client.describe()?;
        let key_fields = meta.key_config().fields();
        if key_fields.len() > 2 {
            return Err(BackendError::new(
                "wide",
                format!("'{}' has a {}-part key; at most 2 are supported", meta.name(), key_fields.len()),
            )
            .into());
        }
        if key_fields != description.key_attributes() {
            return Err(BackendError::new(
                "wide",
                format!(
                    "table key {:?} does not match the key of '{}' {key_fields:?}",
                    description.key_attributes(),
                    meta.name()
                ),
            )
            .into());
        }

        let indexes = std::iter::once(description.table_index())
            .chain(description.indexes.iter().cloned())
            .collect();

        Ok(Self {
            meta,
            ctx: ctx.clone(),
            client,
            description,
            indexes,
            converters: wide_converters(),
        })
    }

    fn key_record(&self, key: &str) -> Result<Record, StoreError> {
        self.meta.key_fields_of(key)
    }

    fn plan(&self, filter: &SearchFilter) -> ReadPlan {
        let plan = match select_index(filter, &self.meta, &self.indexes) {
            Some(plan) => {
                let index = self.indexes[plan.index].clone();
                let scope = if index.projects_all {
                    WideScope::all_attributes()
                } else {
                    let mut attrs = self.description.key_attributes();
                    attrs.push(&index.partition_key);
                    attrs.extend(index.sort_key.as_deref());
                    WideScope::keys_only(attrs)
                };
                let conversion = self.converters.convert(&plan.remainder, &self.meta, &scope);

                ReadPlan {
                    keys_only: !index.projects_all,
                    key: Some((index, plan.key)),
                    native: conversion.condition,
                    handled: conversion.handled,
                }
            }
            None => {
                let conversion = self.converters.convert(filter, &self.meta, &WideScope::all_attributes());
                ReadPlan {
                    key: None,
                    native: conversion.condition,
                    handled: conversion.handled,
                    keys_only: false,
                }
            }
        };

        tracing::debug!(
            record = self.meta.name(),
            index = ?plan.key.as_ref().map(|(index, _)| index.name.clone()),
            handled = plan.handled,
            "wide pushdown"
        );

        plan
    }

    // Whether the backend can return `order` natively for this plan.
    fn native_order(plan: &ReadPlan, order: &SearchOrder) -> Option<bool> {
        if order.is_empty() {
            return Some(true);
        }
        let (index, _) = plan.key.as_ref()?;
        match order.keys() {
            [only] if index.sort_key.as_deref() == Some(only.field.as_str()) => Some(!only.desc),
            _ => None,
        }
    }

    // One native page of full, post-filtered items.
    fn fetch(
        &self,
        plan: &ReadPlan,
        filter: &SearchFilter,
        start: Option<Record>,
        limit: Option<usize>,
        forward: bool,
    ) -> Result<(Vec<Record>, Option<Record>), StoreError> {
        let page = match &plan.key {
            Some((index, key)) => self.client.query(&QueryRequest {
                index: index.clone(),
                key: key.clone(),
                filter: plan.native.clone(),
                limit,
                exclusive_start_key: start,
                scan_forward: forward,
            })?,
            None => self.client.scan(&ScanRequest {
                filter: plan.native.clone(),
                limit,
                exclusive_start_key: start,
            })?,
        };

        let mut items = if plan.keys_only {
            self.hydrate(page.items)?
        } else {
            page.items
        };
        if !plan.handled {
            items.retain(|item| filter.matches(item, self.meta.fields()));
        }

        Ok((items, page.last_evaluated_key))
    }

    // Replace projected index items with full items, keeping their order.
    fn hydrate(&self, projected: Vec<Record>) -> Result<Vec<Record>, StoreError> {
        let keys = projected
            .iter()
            .map(|item| self.meta.key_of(item))
            .collect::<Result<Vec<_>, _>>()?;
        let found = self.read_batch(&keys)?;

        Ok(found.into_iter().flatten().collect())
    }

    // Position of `item` in the index the plan reads.
    fn native_key(&self, plan: &ReadPlan, item: &Record) -> Record {
        let mut attrs = self.description.key_attributes();
        if let Some((index, _)) = &plan.key {
            attrs.push(&index.partition_key);
            attrs.extend(index.sort_key.as_deref());
        }

        item.clone().retain_fields(|name| attrs.contains(&name))
    }

    fn search_native(
        &self,
        plan: &ReadPlan,
        filter: &SearchFilter,
        order: &SearchOrder,
        forward: bool,
        page_key: Option<&str>,
        limit: usize,
    ) -> Result<ResultSet<Record>, StoreError> {
        let mut start = match page_key {
            None => None,
            Some(token) => match PageKey::decode(token, filter, order)?.position {
                PagePosition::Native(start) => Some(start),
                _ => return Err(PageKeyError::WrongPosition.into()),
            },
        };

        // ask for one more than still needed to learn whether a next page exists
        let mut results = Vec::with_capacity(limit + 1);
        let more = loop {
            let want = limit - results.len() + 1;
            let (items, last) = self.fetch(plan, filter, start, Some(want), forward)?;
            results.extend(items);
            if results.len() > limit {
                break true;
            }
            match last {
                Some(last) => start = Some(last),
                None => break false,
            }
        };

        results.truncate(limit);
        let next_page_key = match results.last() {
            Some(last) if more => {
                let position = PagePosition::Native(self.native_key(plan, last));
                Some(PageKey::new(filter, order, position).encode()?)
            }
            _ => None,
        };

        Ok(ResultSet::new(results, next_page_key))
    }

    fn search_sorted(
        &self,
        plan: &ReadPlan,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: usize,
    ) -> Result<ResultSet<Record>, StoreError> {
        let mut records = Vec::new();
        let mut start = None;
        loop {
            let (items, last) = self.fetch(plan, filter, start, None, true)?;
            records.extend(items);
            match last {
                Some(last) => start = Some(last),
                None => break,
            }
        }

        let keyed: Vec<(String, Record)> = records
            .into_iter()
            .map(|record| Ok((self.meta.key_of(&record)?, record)))
            .collect::<Result<_, StoreError>>()?;
        let mut keyed = keyed;
        keyed.sort_by(|a, b| order.compare(&a.1, &b.1).then_with(|| a.0.cmp(&b.0)));

        page_after_key(
            keyed.into_iter().map(|(_, record)| record).collect(),
            |record| self.meta.key_of(record).ok(),
            filter,
            order,
            page_key,
            limit,
        )
    }

    fn write_all(&self, writes: Vec<WriteRequest>) -> Result<Vec<WriteRequest>, StoreError> {
        let mut pending = writes;
        for _ in 0..=UNPROCESSED_RETRIES {
            if pending.is_empty() {
                break;
            }
            let mut unprocessed = Vec::new();
            for chunk in pending.chunks(MAX_BATCH_WRITE) {
                unprocessed.extend(self.client.batch_write(chunk.to_vec())?);
            }
            pending = unprocessed;
        }

        Ok(pending)
    }

    // Send the buffered native writes and settle their result slots.
    fn flush(
        &self,
        buffer: &mut Vec<(usize, BatchEdit, WriteRequest)>,
        slots: &mut [Option<BatchEditResult>],
    ) -> Result<(), StoreError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let unprocessed = self.write_all(buffer.iter().map(|(_, _, write)| write.clone()).collect())?;
        for (at, edit, write) in buffer.drain(..) {
            slots[at] = Some(if unprocessed.contains(&write) {
                BatchEditResult::failed(edit, "backend_error", "write left unprocessed")
            } else {
                BatchEditResult::succeeded(edit)
            });
        }

        Ok(())
    }
}

impl Store for WideColumnStore {
    fn meta(&self) -> &StorageMeta {
        &self.meta
    }

    fn create(&self, item: Record) -> Result<Record, StoreError> {
        let mut record = self.meta.prepare_create(&item, self.ctx.now());
        let key = self.meta.key_of(&record)?;
        record.retain(|_, value| !value.is_null());

        match self.client.put_item(record.clone(), PutCondition::NotExists) {
            Ok(()) => Ok(record),
            Err(WideError::ConditionFailed) => Err(StoreError::duplicate_key(self.meta.name(), key)),
            Err(err) => Err(err.into()),
        }
    }

    fn read(&self, key: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.client.get_item(&self.key_record(key)?)?)
    }

    fn read_batch(&self, keys: &[String]) -> Result<Vec<Option<Record>>, StoreError> {
        let key_records = keys
            .iter()
            .map(|key| self.key_record(key))
            .collect::<Result<Vec<_>, _>>()?;

        let mut found = BTreeMap::new();
        for chunk in key_records.chunks(MAX_BATCH_GET) {
            for item in self.client.batch_get(chunk)? {
                found.insert(self.meta.key_of(&item)?, item);
            }
        }

        Ok(keys.iter().map(|key| found.get(key).cloned()).collect())
    }

    fn update(&self, updates: Record, precondition: &SearchFilter) -> Result<Option<Record>, StoreError> {
        precondition.validate_for_fields(self.meta.fields())?;
        let key = self.meta.key_of(&updates)?;
        let Some(existing) = self.read(&key)? else {
            return Ok(None);
        };
        if !precondition.matches(&existing, self.meta.fields()) {
            return Ok(None);
        }

        let mut merged = self.meta.prepare_update(&existing, &updates, self.ctx.now());
        merged.retain(|_, value| !value.is_null());
        match self.client.put_item(merged.clone(), PutCondition::Exists) {
            Ok(()) => Ok(Some(merged)),
            // removed between the read and the write
            Err(WideError::ConditionFailed) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.client.delete_item(&self.key_record(key)?)?)
    }

    fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        check_query(&self.meta, filter, &SearchOrder::none())?;
        if filter.is_exclude_all() {
            return Ok(0);
        }

        let plan = self.plan(filter);
        if !plan.handled {
            return count_by_scan(self, filter);
        }

        let mut count = 0u64;
        let mut start = None;
        loop {
            let (items, last) = self.fetch(&plan, filter, start, None, true)?;
            count += items.len() as u64;
            match last {
                Some(last) => start = Some(last),
                None => return Ok(count),
            }
        }
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

        let plan = self.plan(filter);
        match Self::native_order(&plan, order) {
            Some(forward) => self.search_native(&plan, filter, order, forward, page_key, limit),
            None => self.search_sorted(&plan, filter, order, page_key, limit),
        }
    }

    /// Creates and deletes go out as native batch writes; updates need a
    /// read-modify-write and run one at a time. Edits apply in input order:
    /// buffered native writes are flushed before any edit that runs alone,
    /// and a key touched earlier in the batch always runs alone.
    fn edit_batch(&self, edits: Vec<BatchEdit>) -> Result<Vec<BatchEditResult>, StoreError> {
        let admissions = admit(self, edits)?;
        let mut slots: Vec<Option<BatchEditResult>> = vec![None; admissions.len()];
        let mut buffer: Vec<(usize, BatchEdit, WriteRequest)> = Vec::new();
        let mut touched: BTreeSet<String> = BTreeSet::new();

        for (at, admission) in admissions.into_iter().enumerate() {
            let edit = match admission {
                Admission::Refused(result) => {
                    slots[at] = Some(result);
                    continue;
                }
                Admission::Admitted(edit) => edit,
            };

            let prepared = match &edit.op {
                EditOp::Create(item) => {
                    let mut record = self.meta.prepare_create(item, self.ctx.now());
                    record.retain(|_, value| !value.is_null());
                    self.meta
                        .key_of(&record)
                        .map(|key| Some((key, EditOp::Create(record.clone()), WriteRequest::Put(record))))
                }
                EditOp::Delete(key) => self
                    .key_record(key)
                    .map(|record| Some((key.clone(), EditOp::Delete(key.clone()), WriteRequest::Delete(record)))),
                EditOp::Update(partial) => {
                    if let Ok(key) = self.meta.key_of(partial) {
                        touched.insert(key);
                    }
                    Ok(None)
                }
            };

            match prepared {
                Ok(Some((key, op, write))) if touched.insert(key.clone()) => {
                    buffer.push((at, BatchEdit::with_id(edit.id, op), write));
                }
                Ok(_) => {
                    self.flush(&mut buffer, &mut slots)?;
                    slots[at] = Some(apply_one(self, edit));
                }
                Err(err) => slots[at] = Some(BatchEditResult::from_error(edit, &err)),
            }
        }
        self.flush(&mut buffer, &mut slots)?;

        let results: Vec<BatchEditResult> = slots.into_iter().flatten().collect();
        tracing::debug!(
            record = self.meta.name(),
            edits = results.len(),
            failed = results.iter().filter(|r| !r.success).count(),
            "wide batch applied"
        );

        Ok(results)
    }
}

impl std::fmt::Debug for WideColumnStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WideColumnStore")
            .field("record", &self.meta.name())
            .field("table", &self.description)
            .finish_non_exhaustive()
    }
}
