//! Module: error
//! Responsibility: the store error taxonomy and its stable classification.
//! Does not own: backend-specific error mapping (each backend maps into `BackendError`).

use std::fmt;
use thiserror::Error as ThisError;

///
/// StoreError
///
/// Every failure a store operation can surface to its caller.
/// Structural and policy errors are raised directly; inside `edit_batch`
/// they are captured into per-item results via [`StoreError::code`].
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("missing key for '{record}'")]
    MissingKey { record: String },

    #[error("duplicate key '{key}' for '{record}'")]
    DuplicateKey { record: String, key: String },

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error(transparent)]
    InvalidFilter(#[from] FilterError),

    #[error("schema validation failed: {}", FieldViolation::join(.0))]
    SchemaValidation(Vec<FieldViolation>),

    #[error("operation '{operation}' is unavailable for '{record}'")]
    UnavailableOperation {
        record: String,
        operation: Operation,
    },

    #[error("invalid page key: {reason}")]
    InvalidPageKey { reason: String },

    #[error("limit {requested} exceeds batch size {max}")]
    LimitExceeded { requested: usize, max: usize },

    #[error("cannot marshal '{record}': {reason}")]
    Marshal { record: String, reason: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StoreError {
    pub(crate) fn missing_key(record: impl Into<String>) -> Self {
        Self::MissingKey {
            record: record.into(),
        }
    }

    pub(crate) fn duplicate_key(record: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            record: record.into(),
            key: key.into(),
        }
    }

    pub(crate) fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(record: impl Into<String>, operation: Operation) -> Self {
        Self::UnavailableOperation {
            record: record.into(),
            operation,
        }
    }

    pub(crate) fn marshal(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Marshal {
            record: record.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_page_key(reason: impl Into<String>) -> Self {
        Self::InvalidPageKey {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used as the error code of batch results.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingKey { .. } => "missing_key",
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::InvalidKey { .. } => "invalid_key",
            Self::InvalidFilter(_) => "invalid_filter",
            Self::SchemaValidation(_) => "schema_validation",
            Self::UnavailableOperation { .. } => "unavailable_operation",
            Self::InvalidPageKey { .. } => "invalid_page_key",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::Marshal { .. } => "marshal_error",
            Self::Backend(_) => "backend_error",
        }
    }

    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateKey { .. } => ErrorClass::Conflict,
            Self::MissingKey { .. } | Self::InvalidPageKey { .. } => ErrorClass::NotFound,
            Self::InvalidKey { .. }
            | Self::InvalidFilter(_)
            | Self::SchemaValidation(_)
            | Self::LimitExceeded { .. }
            | Self::Marshal { .. } => ErrorClass::InvalidInput,
            Self::UnavailableOperation { .. } => ErrorClass::Unsupported,
            Self::Backend(_) => ErrorClass::Backend,
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {self}", self.class(), self.code())
    }
}

///
/// FilterError
///
/// A filter or sort order that cannot be evaluated against a schema.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum FilterError {
    #[error("unknown field '{field}'")]
    UnknownField { field: String },

    #[error("field '{field}' is not readable")]
    UnreadableField { field: String },

    #[error("operator '{op}' is not permitted on field '{field}'")]
    OperatorNotPermitted { field: String, op: String },

    #[error("field '{field}' is not sortable")]
    UnsortableField { field: String },
}

///
/// FieldViolation
///
/// One structural problem found while validating a record.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldViolation {
    pub field: String,
    pub code: &'static str,
    pub detail: String,
}

impl FieldViolation {
    pub(crate) fn new(field: impl Into<String>, code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            detail: detail.into(),
        }
    }

    fn join(violations: &[Self]) -> String {
        violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.detail, self.code)
    }
}

///
/// BackendError
///
/// Opaque failure from a native backend client. Connection lifecycle and
/// retries belong to the client; the core only forwards the message.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("{backend} backend error: {message}")]
pub struct BackendError {
    pub backend: &'static str,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            message: message.into(),
        }
    }
}

///
/// MetaError
///
/// Invariant violations detected while building a [`StorageMeta`](crate::model::StorageMeta).
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum MetaError {
    #[error("record name must not be empty")]
    EmptyName,

    #[error("duplicate field '{field}'")]
    DuplicateField { field: String },

    #[error("key field '{field}' is not declared")]
    UnknownKeyField { field: String },

    #[error("key field '{field}' has a kind that cannot be encoded as a key")]
    UnkeyableField { field: String },

    #[error("composite key must name at least one field")]
    EmptyKey,

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("cannot exclude key field '{field}'")]
    ExcludedKeyField { field: String },
}

///
/// Operation
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Search,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Search => "search",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorClass
/// Coarse error taxonomy for callers that only need to branch on kind.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Conflict,
    NotFound,
    InvalidInput,
    Unsupported,
    Backend,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
            Self::Unsupported => "unsupported",
            Self::Backend => "backend",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_labels() {
        assert_eq!(StoreError::missing_key("note").code(), "missing_key");
        assert_eq!(
            StoreError::duplicate_key("note", "a").code(),
            "duplicate_key"
        );
        assert_eq!(
            StoreError::from(BackendError::new("sqlite", "locked")).code(),
            "backend_error"
        );
    }

    #[test]
    fn schema_validation_message_lists_every_violation() {
        let err = StoreError::SchemaValidation(vec![
            FieldViolation::new("title", "required", "value is required"),
            FieldViolation::new("count", "type", "expected int"),
        ]);

        let message = err.to_string();
        assert!(message.contains("title: value is required"), "{message}");
        assert!(message.contains("count: expected int"), "{message}");
        assert_eq!(err.class(), ErrorClass::InvalidInput);
    }

    #[test]
    fn display_with_class_prefixes_class_and_code() {
        let err = StoreError::unavailable("note", Operation::Delete);

        assert_eq!(
            err.display_with_class(),
            "unsupported:unavailable_operation: operation 'delete' is unavailable for 'note'"
        );
    }
}
