//! Module: store::wide::client
//! Responsibility: the per-table wide-column client seam and its request types.
//! Does not own: expression evaluation (each client evaluates natively).

use crate::{
    pushdown::wide::{KeyCondition, WideCondition, WideIndex},
    record::Record,
};
use thiserror::Error as ThisError;

/// Items per `batch_get` request.
pub const MAX_BATCH_GET: usize = 100;

/// Writes per `batch_write` request.
pub const MAX_BATCH_WRITE: usize = 25;

///
/// TableDescription
///
/// Key schema of the table plus its secondary indexes in declaration order.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableDescription {
    pub partition_key: String,
    pub sort_key: Option<String>,
    pub indexes: Vec<WideIndex>,
}

impl TableDescription {
    /// The table's own key as an index.
    #[must_use]
    pub fn table_index(&self) -> WideIndex {
        WideIndex::table(self.partition_key.clone(), self.sort_key.clone())
    }

    /// Attributes that form the primary key.
    #[must_use]
    pub fn key_attributes(&self) -> Vec<&str> {
        std::iter::once(self.partition_key.as_str())
            .chain(self.sort_key.as_deref())
            .collect()
    }
}

///
/// PutCondition
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutCondition {
    Always,
    /// `attribute_not_exists(<partition key>)`
    NotExists,
    /// `attribute_exists(<partition key>)`
    Exists,
}

///
/// QueryRequest
///

#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub index: WideIndex,
    pub key: KeyCondition,
    pub filter: Option<WideCondition>,
    /// Items evaluated before `filter` is applied.
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Record>,
    pub scan_forward: bool,
}

///
/// ScanRequest
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanRequest {
    pub filter: Option<WideCondition>,
    /// Items evaluated before `filter` is applied.
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Record>,
}

///
/// ItemPage
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemPage {
    pub items: Vec<Record>,
    /// Present when evaluation stopped before the end of the key range.
    pub last_evaluated_key: Option<Record>,
}

///
/// WriteRequest
///

#[derive(Clone, Debug, PartialEq)]
pub enum WriteRequest {
    Put(Record),
    Delete(Record),
}

///
/// WideError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum WideError {
    #[error("conditional check failed")]
    ConditionFailed,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

///
/// WideColumnClient
///
/// One table of a wide-column service. Items are attribute maps; null
/// attributes are never stored.
///

pub trait WideColumnClient: Send + Sync {
    fn describe(&self) -> Result<TableDescription, WideError>;

    fn get_item(&self, key: &Record) -> Result<Option<Record>, WideError>;

    fn put_item(&self, item: Record, condition: PutCondition) -> Result<(), WideError>;

    /// Returns whether an item was removed.
    fn delete_item(&self, key: &Record) -> Result<bool, WideError>;

    fn query(&self, request: &QueryRequest) -> Result<ItemPage, WideError>;

    fn scan(&self, request: &ScanRequest) -> Result<ItemPage, WideError>;

    /// Found items in no particular order; at most [`MAX_BATCH_GET`] keys.
    fn batch_get(&self, keys: &[Record]) -> Result<Vec<Record>, WideError>;

    /// Returns the writes the service left unprocessed; at most
    /// [`MAX_BATCH_WRITE`] writes.
    fn batch_write(&self, writes: Vec<WriteRequest>) -> Result<Vec<WriteRequest>, WideError>;
}
