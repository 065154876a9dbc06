//! Module: wrap::chain
//! Responsibility: assemble wrappers around a base store in the one order
//! that preserves CRUD semantics, whatever order the builder was called in.
//!
//! Outermost to innermost:
//! access control → schema validation → trigger dispatch → caching →
//! field exclusion → base store.

use crate::{
    context::StoreContext,
    error::MetaError,
    model::CacheControl,
    store::Store,
    wrap::{
        AccessControl, AccessControlStore, CachingStore, FieldExclusionStore, SchemaValidatingStore,
        TriggerStore,
    },
};
use std::{collections::BTreeSet, sync::Arc, time::Duration};

///
/// CacheSetting
///

#[derive(Clone, Copy, Debug)]
enum CacheSetting {
    Off,
    Schema,
    Control(CacheControl),
}

///
/// StoreChain
///

pub struct StoreChain {
    base: Arc<dyn Store>,
    ctx: StoreContext,
    access: Option<Arc<dyn AccessControl>>,
    validate: bool,
    triggers: bool,
    cache: CacheSetting,
    excluded: BTreeSet<String>,
}

impl StoreChain {
    #[must_use]
    pub fn new(base: Arc<dyn Store>, ctx: &StoreContext) -> Self {
        Self {
            base,
            ctx: ctx.clone(),
            access: None,
            validate: false,
            triggers: false,
            cache: CacheSetting::Off,
            excluded: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn access(mut self, control: Arc<dyn AccessControl>) -> Self {
        self.access = Some(control);
        self
    }

    #[must_use]
    pub const fn validate_schema(mut self) -> Self {
        self.validate = true;
        self
    }

    #[must_use]
    pub const fn dispatch_triggers(mut self) -> Self {
        self.triggers = true;
        self
    }

    /// Cache with the base schema's cache control.
    #[must_use]
    pub const fn cache(mut self) -> Self {
        self.cache = CacheSetting::Schema;
        self
    }

    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = CacheSetting::Control(CacheControl { cacheable: true, ttl });
        self
    }

    #[must_use]
    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Wrap the base store, innermost first.
    pub fn build(self) -> Result<Arc<dyn Store>, MetaError> {
        let mut store = self.base;
        let mut layers = Vec::new();

        if !self.excluded.is_empty() {
            store = Arc::new(FieldExclusionStore::new(store, self.excluded)?);
            layers.push("exclude");
        }
        match self.cache {
            CacheSetting::Off => {}
            CacheSetting::Schema => {
                store = Arc::new(CachingStore::new(store, &self.ctx));
                layers.push("cache");
            }
            CacheSetting::Control(control) => {
                store = Arc::new(CachingStore::with_control(store, control, &self.ctx));
                layers.push("cache");
            }
        }
        if self.triggers {
            store = Arc::new(TriggerStore::new(store, &self.ctx));
            layers.push("trigger");
        }
        if self.validate {
            store = Arc::new(SchemaValidatingStore::new(store, &self.ctx));
            layers.push("schema");
        }
        if let Some(control) = self.access {
            store = Arc::new(AccessControlStore::new(store, control));
            layers.push("access");
        }

        tracing::debug!(record = store.meta().name(), layers = ?layers, "store chain built");

        Ok(store)
    }
}

impl std::fmt::Debug for StoreChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreChain")
            .field("record", &self.base.meta().name())
            .field("access", &self.access.is_some())
            .field("validate", &self.validate)
            .field("triggers", &self.triggers)
            .field("cache", &self.cache)
            .field("excluded", &self.excluded)
            .finish()
    }
}
