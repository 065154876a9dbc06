//! stowdb: schema-first storage with filter pushdown and composable store
//! wrappers.
//!
//! This is the public meta-crate. Downstream users depend on **stowdb** only.
//!
//! It re-exports the stable public API from:
//!   - `stowdb-core`    (values, records, filters, stores, wrappers)
//!   - `stowdb-config`  (TOML store settings)
//!
//! and adds [`assemble`], which turns one configured section into a wrapped store.

pub use stowdb_config as config;
pub use stowdb_core as core;

pub use stowdb_core::record;

use std::sync::Arc;
use stowdb_config::{ConfigError, StoreSettings};
use stowdb_core::{
    context::StoreContext,
    error::{MetaError, StoreError},
    model::{CacheControl, StorageAccess, StorageMeta},
    store::Store,
    wrap::{AccessPolicy, StoreChain},
};
use thiserror::Error as ThisError;

///
/// Error
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Apply the schema-level parts of `settings` (batch size, cache TTL) to
/// `meta`, before the base store is built from it.
#[must_use]
pub fn configure_meta(meta: &StorageMeta, settings: &StoreSettings) -> StorageMeta {
    let mut meta = meta.clone();
    if let Some(batch_size) = settings.batch_size {
        meta = meta.with_batch_size(batch_size);
    }
    if let Some(ttl) = settings.cache_ttl() {
        meta = meta.with_cache_control(CacheControl { cacheable: true, ttl });
    }
    if settings.readonly {
        meta = meta.with_access(meta.access() & StorageAccess::READ_ONLY);
    }

    meta
}

/// Wrap `base` with the layers `settings` enables.
pub fn assemble(base: Arc<dyn Store>, settings: &StoreSettings, ctx: &StoreContext) -> Result<Arc<dyn Store>, Error> {
    let record = base.meta().name().to_string();
    let mut chain = StoreChain::new(Arc::clone(&base), ctx).exclude(settings.exclude_fields.iter().cloned());

    if let Some(ttl) = settings.cache_ttl() {
        chain = chain.cache_ttl(ttl);
    }
    if settings.dispatch_triggers {
        chain = chain.dispatch_triggers();
    }
    if settings.validate_schema {
        chain = chain.validate_schema();
    }
    if settings.readonly {
        chain = chain.access(Arc::new(AccessPolicy::new(base.meta(), StorageAccess::READ_ONLY)));
    }

    let store = chain.build()?;
    tracing::info!(
        record = %record,
        cache_ttl_secs = ?settings.cache_ttl_secs,
        excluded = settings.exclude_fields.len(),
        validate = settings.validate_schema,
        triggers = settings.dispatch_triggers,
        readonly = settings.readonly,
        "store assembled from configuration"
    );

    Ok(store)
}

///
/// Prelude
///

pub mod prelude {
    pub use stowdb_core::prelude::*;
}
