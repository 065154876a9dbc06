//! Module: model::meta
//! Responsibility: the immutable per-record-type schema handed to every store.
//! Does not own: structural validation of records (see `wrap::schema`).

use crate::{
    DEFAULT_BATCH_SIZE,
    error::{MetaError, StoreError},
    model::{Field, KeyConfig, StorageAccess, WriteKind},
    record::Record,
};
use chrono::{DateTime, Utc};
use std::{collections::BTreeSet, sync::Arc, time::Duration};

///
/// CacheControl
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheControl {
    pub cacheable: bool,
    pub ttl: Duration,
}

impl Default for CacheControl {
    fn default() -> Self {
        Self {
            cacheable: true,
            ttl: Duration::from_secs(60),
        }
    }
}

///
/// StorageMeta
///
/// Schema of one record type: ordered fields, key configuration, access
/// descriptor, batch size ceiling and cache control.
/// Cheap to clone; "modifying" methods return a new value.
///

#[derive(Clone, Debug)]
pub struct StorageMeta {
    name: String,
    fields: Arc<[Field]>,
    key: KeyConfig,
    access: StorageAccess,
    batch_size: usize,
    cache_control: CacheControl,
}

impl StorageMeta {
    pub fn builder(name: impl Into<String>) -> StorageMetaBuilder {
        StorageMetaBuilder {
            name: name.into(),
            fields: Vec::new(),
            key: None,
            access: StorageAccess::ALL,
            batch_size: DEFAULT_BATCH_SIZE,
            cache_control: CacheControl::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name() == name)
    }

    #[must_use]
    pub const fn key_config(&self) -> &KeyConfig {
        &self.key
    }

    #[must_use]
    pub const fn access(&self) -> StorageAccess {
        self.access
    }

    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub const fn cache_control(&self) -> CacheControl {
        self.cache_control
    }

    #[must_use]
    pub fn with_access(&self, access: StorageAccess) -> Self {
        Self {
            access,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_cache_control(&self, cache_control: CacheControl) -> Self {
        Self {
            cache_control,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_batch_size(&self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self.clone()
        }
    }

    /// Derive a view of this schema without `excluded` fields.
    pub fn without_fields(&self, excluded: &BTreeSet<String>) -> Result<Self, MetaError> {
        if let Some(field) = self.key.fields().into_iter().find(|f| excluded.contains(*f)) {
            return Err(MetaError::ExcludedKeyField {
                field: field.to_string(),
            });
        }

        let fields: Vec<Field> = self
            .fields
            .iter()
            .filter(|field| !excluded.contains(field.name()))
            .cloned()
            .collect();

        Ok(Self {
            fields: fields.into(),
            ..self.clone()
        })
    }

    /// Encode the key of `record`; `MissingKey` when it cannot be derived.
    pub fn key_of(&self, record: &Record) -> Result<String, StoreError> {
        self.key
            .to_key_str(record)
            .ok_or_else(|| StoreError::missing_key(&self.name))
    }

    /// Decode `key` into a record holding only the key fields.
    pub fn key_fields_of(&self, key: &str) -> Result<Record, StoreError> {
        self.key.from_key_str(key, &self.fields)
    }

    /// Resolve a requested page size against the batch size ceiling.
    pub fn resolve_limit(&self, limit: Option<usize>) -> Result<usize, StoreError> {
        match limit {
            None => Ok(self.batch_size),
            Some(requested) if requested > self.batch_size => Err(StoreError::LimitExceeded {
                requested,
                max: self.batch_size,
            }),
            Some(requested) => Ok(requested.max(1)),
        }
    }

    /// Build the record to persist for a create: only creatable, declared
    /// fields survive, then create transforms run in field order.
    #[must_use]
    pub fn prepare_create(&self, item: &Record, now: DateTime<Utc>) -> Record {
        let mut record = item
            .clone()
            .retain_fields(|name| self.field(name).is_some_and(|field| field.creatable));

        for field in self.fields.iter().filter(|field| field.creatable) {
            field.apply_transform(&mut record, WriteKind::Create, now);
        }

        record
    }

    /// Merge `updates` into `existing`: only updatable fields are taken,
    /// then update transforms run in field order.
    #[must_use]
    pub fn prepare_update(&self, existing: &Record, updates: &Record, now: DateTime<Utc>) -> Record {
        let mut record = existing.clone();
        for (name, value) in updates.iter() {
            let updatable = self.field(name).is_some_and(|field| field.updatable);
            if updatable && !self.key.is_key_field(name) {
                record.set(name.clone(), value.clone());
            }
        }

        for field in self.fields.iter().filter(|field| field.updatable) {
            field.apply_transform(&mut record, WriteKind::Update, now);
        }

        record
    }

    /// Drop fields the schema does not declare as readable.
    #[must_use]
    pub fn readable_view(&self, record: Record) -> Record {
        record.retain_fields(|name| self.field(name).is_some_and(|field| field.readable))
    }
}

///
/// StorageMetaBuilder
///

#[derive(Debug)]
pub struct StorageMetaBuilder {
    name: String,
    fields: Vec<Field>,
    key: Option<KeyConfig>,
    access: StorageAccess,
    batch_size: usize,
    cache_control: CacheControl,
}

impl StorageMetaBuilder {
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn key(mut self, key: KeyConfig) -> Self {
        self.key = Some(key);
        self
    }

    #[must_use]
    pub const fn access(mut self, access: StorageAccess) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn cache_control(mut self, cache_control: CacheControl) -> Self {
        self.cache_control = cache_control;
        self
    }

    /// Validate and freeze the schema. The key defaults to the first field.
    pub fn build(self) -> Result<StorageMeta, MetaError> {
        if self.name.is_empty() {
            return Err(MetaError::EmptyName);
        }
        if self.batch_size == 0 {
            return Err(MetaError::ZeroBatchSize);
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.name()) {
                return Err(MetaError::DuplicateField {
                    field: field.name().to_string(),
                });
            }
        }

        let key = match self.key {
            Some(key) => key,
            None => KeyConfig::field(self.fields.first().ok_or(MetaError::EmptyKey)?.name()),
        };
        let key_fields = key.fields();
        if key_fields.is_empty() {
            return Err(MetaError::EmptyKey);
        }
        for name in key_fields {
            let field = self
                .fields
                .iter()
                .find(|field| field.name() == name)
                .ok_or_else(|| MetaError::UnknownKeyField {
                    field: name.to_string(),
                })?;
            if !field.kind().is_keyable() {
                return Err(MetaError::UnkeyableField {
                    field: name.to_string(),
                });
            }
        }

        Ok(StorageMeta {
            name: self.name,
            fields: self.fields.into(),
            key,
            access: self.access,
            batch_size: self.batch_size,
            cache_control: self.cache_control,
        })
    }
}
