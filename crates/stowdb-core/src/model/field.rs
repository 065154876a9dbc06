use crate::{
    filter::FilterOp,
    record::Record,
    value::{Value, format_timestamp},
};
use chrono::{DateTime, Utc};
use std::{collections::BTreeSet, fmt, sync::Arc};
use ulid::Ulid;
use uuid::Uuid;

///
/// FieldKind
///
/// Declared type of a field. Drives validation, key encoding, default
/// operator sets, and backend column mapping.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FieldKind {
    Text,
    Int,
    Float,
    Bool,
    Blob,
    Timestamp,
    Uuid,
    Json,
}

impl FieldKind {
    /// Whether a value of this kind can be stored in the field. Null is
    /// always accepted here; nullability is checked separately.
    #[must_use]
    pub const fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Text, Value::Text(_))
                | (Self::Int, Value::Int(_))
                | (Self::Float, Value::Float(_) | Value::Int(_))
                | (Self::Bool, Value::Bool(_))
                | (Self::Blob, Value::Blob(_))
                | (Self::Timestamp, Value::Timestamp(_))
                | (Self::Uuid, Value::Uuid(_))
                | (Self::Json, Value::Json(_))
        )
    }

    /// Kinds whose values have a canonical, reversible key-string form.
    #[must_use]
    pub const fn is_keyable(self) -> bool {
        matches!(
            self,
            Self::Text | Self::Int | Self::Bool | Self::Timestamp | Self::Uuid
        )
    }

    #[must_use]
    pub const fn default_sortable(self) -> bool {
        !matches!(self, Self::Blob | Self::Json)
    }

    #[must_use]
    pub fn default_operators(self) -> BTreeSet<FilterOp> {
        use FilterOp::*;

        let ops: &[FilterOp] = match self {
            Self::Text => &[
                Eq, Ne, Gt, Gte, Lt, Lte, Contains, StartsWith, EndsWith, OneOf,
            ],
            Self::Int | Self::Float | Self::Timestamp | Self::Uuid => {
                &[Eq, Ne, Gt, Gte, Lt, Lte, OneOf]
            }
            Self::Bool | Self::Blob | Self::Json => &[Eq, Ne, OneOf],
        };

        ops.iter().copied().collect()
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Blob => "blob",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
            Self::Json => "json",
        }
    }
}

///
/// WriteKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteKind {
    Create,
    Update,
}

///
/// KeyGenerator
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyGenerator {
    UuidV4,
    Ulid,
}

impl KeyGenerator {
    fn generate(self, kind: FieldKind) -> Value {
        match (self, kind) {
            (Self::UuidV4, FieldKind::Uuid) => Value::Uuid(Uuid::new_v4()),
            (Self::UuidV4, _) => Value::Text(Uuid::new_v4().hyphenated().to_string()),
            (Self::Ulid, _) => Value::Text(Ulid::new().to_string()),
        }
    }
}

///
/// CustomTransform
///
/// User function over the current value. Returning `None` leaves the field
/// untouched.
///

pub type CustomTransformFn = dyn Fn(Option<&Value>, WriteKind) -> Option<Value> + Send + Sync;

#[derive(Clone)]
pub struct CustomTransform(Arc<CustomTransformFn>);

impl CustomTransform {
    pub fn new(
        f: impl Fn(Option<&Value>, WriteKind) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for CustomTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomTransform(..)")
    }
}

///
/// WriteTransform
///
/// Value rewrite applied to a field at create and/or update time.
///

#[derive(Clone, Debug)]
pub enum WriteTransform {
    /// Fill a missing or null value at create time.
    Default(Value),
    /// Generate an identifier at create time when none was supplied.
    Generate(KeyGenerator),
    /// Stamp the current time at create time.
    CreatedAt,
    /// Stamp the current time at create and update time.
    UpdatedAt,
    Custom(CustomTransform),
}

impl WriteTransform {
    /// Whether this transform guarantees a value at create time.
    #[must_use]
    pub const fn supplies_on_create(&self) -> bool {
        matches!(
            self,
            Self::Default(_) | Self::Generate(_) | Self::CreatedAt | Self::UpdatedAt
        )
    }
}

///
/// Field
///
/// One declared field of a record type.
///

#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    kind: FieldKind,
    pub readable: bool,
    pub creatable: bool,
    pub updatable: bool,
    pub indexed: bool,
    pub sortable: bool,
    pub nullable: bool,
    pub max_length: Option<usize>,
    operators: BTreeSet<FilterOp>,
    transform: Option<WriteTransform>,
}

impl Field {
    /// Declare a readable, creatable, updatable, nullable field with the
    /// default operator set for its kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            readable: true,
            creatable: true,
            updatable: true,
            indexed: false,
            sortable: kind.default_sortable(),
            nullable: true,
            max_length: None,
            operators: kind.default_operators(),
            transform: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        self.kind
    }

    #[must_use]
    pub const fn transform(&self) -> Option<&WriteTransform> {
        self.transform.as_ref()
    }

    #[must_use]
    pub fn permits(&self, op: FilterOp) -> bool {
        self.operators.contains(&op)
    }

    #[must_use]
    pub const fn operators(&self) -> &BTreeSet<FilterOp> {
        &self.operators
    }

    /// A field the caller must supply at create time.
    #[must_use]
    pub fn is_required(&self) -> bool {
        !self.nullable
            && !self
                .transform
                .as_ref()
                .is_some_and(WriteTransform::supplies_on_create)
    }

    ///
    /// Builder-style modifiers
    ///

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub const fn immutable(mut self) -> Self {
        self.updatable = false;
        self
    }

    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.readable = false;
        self
    }

    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    #[must_use]
    pub const fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    #[must_use]
    pub const fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    #[must_use]
    pub fn operators_only(mut self, ops: &[FilterOp]) -> Self {
        self.operators = ops.iter().copied().collect();
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: WriteTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Apply this field's write-transform to `record`.
    pub(crate) fn apply_transform(&self, record: &mut Record, kind: WriteKind, now: DateTime<Utc>) {
        let Some(transform) = &self.transform else {
            return;
        };

        let current = record.get(&self.name).filter(|value| !value.is_null());
        let next = match (transform, kind) {
            (WriteTransform::Default(value), WriteKind::Create) if current.is_none() => {
                Some(value.clone())
            }
            (WriteTransform::Generate(generator), WriteKind::Create) if current.is_none() => {
                Some(generator.generate(self.kind))
            }
            (WriteTransform::CreatedAt, WriteKind::Create) | (WriteTransform::UpdatedAt, _) => {
                Some(self.stamp(now))
            }
            (WriteTransform::Custom(custom), _) => (custom.0)(current, kind),
            _ => None,
        };

        if let Some(value) = next {
            record.set(self.name.clone(), value);
        }
    }

    fn stamp(&self, now: DateTime<Utc>) -> Value {
        match self.kind {
            FieldKind::Text => Value::Text(format_timestamp(&now)),
            FieldKind::Int => Value::Int(now.timestamp_millis()),
            _ => Value::timestamp(now),
        }
    }
}
