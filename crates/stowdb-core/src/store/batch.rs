//! Module: store::batch
//! Responsibility: batch-edit vocabulary, admissibility pre-checks, and the
//! sequential executor with per-item error capture.
//! Does not own: native multi-item writes (backends override `edit_batch`).
//! Boundary: one result per edit, in input order; item failures never abort.

use crate::{
    error::StoreError,
    filter::SearchFilter,
    model::StorageMeta,
    record::Record,
    store::Store,
};
use std::collections::BTreeMap;
use ulid::Ulid;

///
/// EditOp
///

#[derive(Clone, Debug, PartialEq)]
pub enum EditOp {
    Create(Record),
    Update(Record),
    Delete(String),
}

///
/// BatchEdit
/// One edit plus its client-generated correlation id.
///

#[derive(Clone, Debug, PartialEq)]
pub struct BatchEdit {
    pub id: Ulid,
    pub op: EditOp,
}

impl BatchEdit {
    #[must_use]
    pub fn create(item: Record) -> Self {
        Self::with_id(Ulid::new(), EditOp::Create(item))
    }

    #[must_use]
    pub fn update(partial: Record) -> Self {
        Self::with_id(Ulid::new(), EditOp::Update(partial))
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::with_id(Ulid::new(), EditOp::Delete(key.into()))
    }

    #[must_use]
    pub const fn with_id(id: Ulid, op: EditOp) -> Self {
        Self { id, op }
    }

    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self.op {
            EditOp::Create(_) => "create",
            EditOp::Update(_) => "update",
            EditOp::Delete(_) => "delete",
        }
    }
}

///
/// BatchEditResult
///
/// Outcome of one edit. On success the edit carries the stored item for
/// creates and updates.
///

#[derive(Clone, Debug, PartialEq)]
pub struct BatchEditResult {
    pub edit: BatchEdit,
    pub success: bool,
    pub code: Option<&'static str>,
    pub detail: Option<String>,
}

impl BatchEditResult {
    #[must_use]
    pub const fn succeeded(edit: BatchEdit) -> Self {
        Self {
            edit,
            success: true,
            code: None,
            detail: None,
        }
    }

    pub fn failed(edit: BatchEdit, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            edit,
            success: false,
            code: Some(code),
            detail: Some(detail.into()),
        }
    }

    #[must_use]
    pub fn from_error(edit: BatchEdit, err: &StoreError) -> Self {
        Self::failed(edit, err.code(), err.to_string())
    }

    #[must_use]
    pub const fn id(&self) -> Ulid {
        self.edit.id
    }

    /// Stored item of a successful create or update.
    #[must_use]
    pub const fn item(&self) -> Option<&Record> {
        match &self.edit.op {
            EditOp::Create(item) | EditOp::Update(item) if self.success => Some(item),
            _ => None,
        }
    }
}

/// Code for an update or delete that ran but changed nothing.
pub const REJECTED: &str = "rejected";

///
/// Admission
/// Pre-read verdict for one edit.
///

#[derive(Debug)]
pub enum Admission {
    Admitted(BatchEdit),
    Refused(BatchEditResult),
}

/// Split `edits` into admissible and refused ones with a single `read_batch`.
///
/// Creates whose key already exists are refused with `duplicate_key`;
/// updates and deletes whose key is absent are refused with `missing_key`.
/// Creates without a derivable key are admitted (a generator may supply it).
pub fn admit<S>(store: &S, edits: Vec<BatchEdit>) -> Result<Vec<Admission>, StoreError>
where
    S: Store + ?Sized,
{
    admit_with(store.meta(), edits, |keys| store.read_batch(keys))
}

/// [`admit`] with the pre-read supplied by the caller.
pub fn admit_with<R>(meta: &StorageMeta, edits: Vec<BatchEdit>, read_batch: R) -> Result<Vec<Admission>, StoreError>
where
    R: FnOnce(&[String]) -> Result<Vec<Option<Record>>, StoreError>,
{
    let max = meta.batch_size();
    if edits.len() > max {
        return Err(StoreError::LimitExceeded {
            requested: edits.len(),
            max,
        });
    }

    let keys: Vec<Option<Result<String, StoreError>>> = edits
        .iter()
        .map(|edit| match &edit.op {
            EditOp::Create(item) => meta.key_of(item).ok().map(Ok),
            EditOp::Update(partial) => Some(meta.key_of(partial)),
            EditOp::Delete(key) => Some(Ok(key.clone())),
        })
        .collect();

    let mut lookup: Vec<String> = keys
        .iter()
        .filter_map(|key| key.as_ref().and_then(|k| k.as_ref().ok()).cloned())
        .collect();
    lookup.sort();
    lookup.dedup();
    let found = read_batch(&lookup)?;
    let exists: BTreeMap<&str, bool> = lookup
        .iter()
        .map(String::as_str)
        .zip(found.iter().map(Option::is_some))
        .collect();

    Ok(edits
        .into_iter()
        .zip(keys)
        .map(|(edit, key)| {
            let key = match key {
                None => return Admission::Admitted(edit),
                Some(Err(err)) => return Admission::Refused(BatchEditResult::from_error(edit, &err)),
                Some(Ok(key)) => key,
            };
            let present = exists.get(key.as_str()).copied().unwrap_or(false);

            match (&edit.op, present) {
                (EditOp::Create(_), true) => {
                    let err = StoreError::duplicate_key(meta.name(), &key);
                    Admission::Refused(BatchEditResult::from_error(edit, &err))
                }
                (EditOp::Update(_) | EditOp::Delete(_), false) => {
                    Admission::Refused(BatchEditResult::failed(
                        edit,
                        "missing_key",
                        format!("no '{}' with key '{key}'", meta.name()),
                    ))
                }
                _ => Admission::Admitted(edit),
            }
        })
        .collect())
}

/// Run one edit through `store`, capturing any error into the result.
pub fn apply_one<S>(store: &S, edit: BatchEdit) -> BatchEditResult
where
    S: Store + ?Sized,
{
    let BatchEdit { id, op } = edit;
    match op {
        EditOp::Create(item) => match store.create(item.clone()) {
            Ok(stored) => BatchEditResult::succeeded(BatchEdit::with_id(id, EditOp::Create(stored))),
            Err(err) => BatchEditResult::from_error(BatchEdit::with_id(id, EditOp::Create(item)), &err),
        },
        EditOp::Update(partial) => match store.update(partial.clone(), &SearchFilter::IncludeAll) {
            Ok(Some(stored)) => {
                BatchEditResult::succeeded(BatchEdit::with_id(id, EditOp::Update(stored)))
            }
            Ok(None) => BatchEditResult::failed(
                BatchEdit::with_id(id, EditOp::Update(partial)),
                REJECTED,
                "update was filtered out",
            ),
            Err(err) => BatchEditResult::from_error(BatchEdit::with_id(id, EditOp::Update(partial)), &err),
        },
        EditOp::Delete(key) => {
            let edit = BatchEdit::with_id(id, EditOp::Delete(key.clone()));
            match store.delete(&key) {
                Ok(true) => BatchEditResult::succeeded(edit),
                Ok(false) => BatchEditResult::failed(edit, REJECTED, "delete was filtered out"),
                Err(err) => BatchEditResult::from_error(edit, &err),
            }
        }
    }
}

/// Default `edit_batch`: admit, then apply each admitted edit in order.
pub fn edit_sequentially<S>(store: &S, edits: Vec<BatchEdit>) -> Result<Vec<BatchEditResult>, StoreError>
where
    S: Store + ?Sized,
{
    edit_sequentially_with(store, edits, |keys| store.read_batch(keys))
}

/// [`edit_sequentially`] with the pre-read supplied by the caller.
pub fn edit_sequentially_with<S, R>(
    store: &S,
    edits: Vec<BatchEdit>,
    read_batch: R,
) -> Result<Vec<BatchEditResult>, StoreError>
where
    S: Store + ?Sized,
    R: FnOnce(&[String]) -> Result<Vec<Option<Record>>, StoreError>,
{
    let admissions = admit_with(store.meta(), edits, read_batch)?;
    let results: Vec<BatchEditResult> = admissions
        .into_iter()
        .map(|admission| match admission {
            Admission::Admitted(edit) => apply_one(store, edit),
            Admission::Refused(result) => result,
        })
        .collect();

    tracing::debug!(
        record = store.meta().name(),
        edits = results.len(),
        failed = results.iter().filter(|r| !r.success).count(),
        "batch applied"
    );

    Ok(results)
}
