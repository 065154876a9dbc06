//! Module: marshal
//! Responsibility: convert typed application values to and from `Record`s at
//! the store boundary.
//! Does not own: schema definition; conversions are guided by `StorageMeta`.

use crate::{
    error::StoreError,
    filter::SearchFilter,
    model::{FieldKind, StorageMeta},
    order::SearchOrder,
    record::Record,
    store::{ResultSet, Store},
    value::{Value, format_timestamp},
};
use chrono::DateTime;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Number, Value as Json};
use std::{fmt, marker::PhantomData, sync::Arc};
use uuid::Uuid;

///
/// Marshal
///
/// Two-way mapping between `T` and the generic record form.
///

pub trait Marshal<T>: Send + Sync {
    fn dump(&self, value: &T) -> Result<Record, StoreError>;

    fn load(&self, record: Record) -> Result<T, StoreError>;
}

///
/// JsonMarshal
///
/// Marshals any serde type whose serialized form is a flat JSON object,
/// converting each member to the declared kind of its field.
///

#[derive(Clone, Debug)]
pub struct JsonMarshal {
    meta: StorageMeta,
}

impl JsonMarshal {
    #[must_use]
    pub const fn new(meta: StorageMeta) -> Self {
        Self { meta }
    }

    fn error(&self, reason: impl Into<String>) -> StoreError {
        StoreError::marshal(self.meta.name(), reason)
    }

    fn from_json(&self, field: &str, json: Json) -> Result<Value, StoreError> {
        let Some(kind) = self.meta.field(field).map(|field| field.kind()) else {
            return Err(self.error(format!("field '{field}' is not declared")));
        };
        let mismatch = |found: &Json| self.error(format!("field '{field}': expected {}, found {found}", kind.label()));

        Ok(match (kind, json) {
            (_, Json::Null) => Value::Null,
            (FieldKind::Json, json) => Value::Json(json),
            (FieldKind::Text, Json::String(text)) => Value::Text(text),
            (FieldKind::Bool, Json::Bool(b)) => Value::Bool(b),
            (FieldKind::Int, Json::Number(n)) if n.is_i64() => Value::Int(n.as_i64().unwrap_or_default()),
            (FieldKind::Float, Json::Number(n)) => match n.as_f64() {
                Some(f) => Value::Float(f),
                None => return Err(mismatch(&Json::Number(n))),
            },
            (FieldKind::Timestamp, Json::String(text)) => match DateTime::parse_from_rfc3339(&text) {
                Ok(ts) => Value::timestamp(ts.to_utc()),
                Err(_) => return Err(mismatch(&Json::String(text))),
            },
            (FieldKind::Uuid, Json::String(text)) => match Uuid::parse_str(&text) {
                Ok(id) => Value::Uuid(id),
                Err(_) => return Err(mismatch(&Json::String(text))),
            },
            (FieldKind::Blob, Json::Array(items)) => {
                let bytes: Option<Vec<u8>> = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
                    .collect();
                match bytes {
                    Some(bytes) => Value::Blob(bytes),
                    None => return Err(mismatch(&Json::Array(items))),
                }
            }
            (_, other) => return Err(mismatch(&other)),
        })
    }
}

/// JSON form of a stored value.
fn to_json(value: Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(b),
        Value::Int(n) => Json::Number(n.into()),
        Value::Float(f) => Number::from_f64(f).map_or(Json::Null, Json::Number),
        Value::Text(text) => Json::String(text),
        Value::Blob(bytes) => Json::Array(bytes.into_iter().map(|b| Json::Number(b.into())).collect()),
        Value::Timestamp(ts) => Json::String(format_timestamp(&ts)),
        Value::Uuid(id) => Json::String(id.hyphenated().to_string()),
        Value::Json(json) => json,
        Value::List(items) => Json::Array(items.into_iter().map(to_json).collect()),
    }
}

impl<T> Marshal<T> for JsonMarshal
where
    T: Serialize + DeserializeOwned,
{
    fn dump(&self, value: &T) -> Result<Record, StoreError> {
        let json = serde_json::to_value(value).map_err(|err| self.error(err.to_string()))?;
        let Json::Object(members) = json else {
            return Err(self.error("value does not serialize to an object"));
        };

        members
            .into_iter()
            .map(|(field, json)| {
                let value = self.from_json(&field, json)?;
                Ok((field, value))
            })
            .collect()
    }

    fn load(&self, record: Record) -> Result<T, StoreError> {
        let members: Map<String, Json> = record
            .into_iter()
            .map(|(field, value)| (field, to_json(value)))
            .collect();

        serde_json::from_value(Json::Object(members)).map_err(|err| self.error(err.to_string()))
    }
}

///
/// TypedStore
///
/// Typed view over any store. Filters and orders stay untyped.
///

pub struct TypedStore<T, M> {
    inner: Arc<dyn Store>,
    marshal: M,
    _marker: PhantomData<fn() -> T>,
}

impl<T, M: Marshal<T>> TypedStore<T, M> {
    #[must_use]
    pub fn new(inner: Arc<dyn Store>, marshal: M) -> Self {
        Self {
            inner,
            marshal,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner
    }

    pub fn create(&self, value: &T) -> Result<T, StoreError> {
        let stored = self.inner.create(self.marshal.dump(value)?)?;

        self.marshal.load(stored)
    }

    pub fn read(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.inner
            .read(key)?
            .map(|record| self.marshal.load(record))
            .transpose()
    }

    /// Update with every field `value` dumps to; the key comes from `value`.
    pub fn update(&self, value: &T, precondition: &SearchFilter) -> Result<Option<T>, StoreError> {
        self.inner
            .update(self.marshal.dump(value)?, precondition)?
            .map(|record| self.marshal.load(record))
            .transpose()
    }

    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }

    pub fn count(&self, filter: &SearchFilter) -> Result<u64, StoreError> {
        self.inner.count(filter)
    }

    pub fn search(
        &self,
        filter: &SearchFilter,
        order: &SearchOrder,
        page_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ResultSet<T>, StoreError> {
        self.inner
            .search(filter, order, page_key, limit)?
            .try_map(|record| self.marshal.load(record))
    }
}

impl<T, M> fmt::Debug for TypedStore<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedStore")
            .field("record", &self.inner.meta().name())
            .field("type", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}
