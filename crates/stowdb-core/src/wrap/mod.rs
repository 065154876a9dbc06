//! Module: wrap
//! Responsibility: stores that decorate another store (access control,
//! schema validation, trigger dispatch, caching, field exclusion) and the
//! builder that composes them.
//! Does not own: persistence; every wrapper forwards to an inner `Arc<dyn Store>`.
//! Boundary: wrappers only change what their concern names and forward the rest.

pub mod access;
pub mod cache;
pub mod chain;
pub mod exclude;
pub mod schema;
pub mod trigger;

pub use access::{
    AccessControl, AccessControlFactory, AccessControlStore, AccessPolicy, Authorization,
    FieldScopedAccess,
};
pub use cache::CachingStore;
pub use chain::StoreChain;
pub use exclude::FieldExclusionStore;
pub use schema::{SchemaValidatingStore, validate_record};
pub use trigger::TriggerStore;
