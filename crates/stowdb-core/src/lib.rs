//! Core runtime for stowdb: values, records, schema metadata, the search
//! filter algebra, backend pushdown, base stores, and the wrapper chain.
#![warn(unreachable_pub)]

#[macro_use]
mod macros;

// public exports are one module level down
pub mod context;
pub mod error;
pub mod filter;
pub mod marshal;
pub mod model;
pub mod order;
pub mod pushdown;
pub mod record;
pub mod store;
pub mod trigger;
pub mod value;
pub mod wrap;

#[cfg(test)]
pub(crate) mod test_support;

///
/// CONSTANTS
///

/// Page size ceiling used when a schema does not declare its own.
pub const DEFAULT_BATCH_SIZE: usize = 100;

///
/// Prelude
///
/// Prelude contains only domain vocabulary and the store contract.
/// No backends, wrappers, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        error::StoreError,
        filter::{FilterOp, SearchFilter},
        model::{Field, FieldKind, KeyConfig, StorageAccess, StorageMeta},
        order::SearchOrder,
        record::Record,
        store::{BatchEdit, BatchEditResult, ResultSet, Store, StoreExt},
        value::Value,
    };
}
