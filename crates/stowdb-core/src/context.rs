//! Module: context
//! Responsibility: the explicit runtime context handed to every store and
//! wrapper constructor (clock, trigger registry, trigger dispatcher).
//! There is no ambient global; callers build one context at startup.

use crate::trigger::{ThreadDispatcher, TriggerDispatcher, TriggerRegistry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

///
/// Clock
///

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

///
/// SystemClock
///

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

///
/// ManualClock
/// Clock that only moves when told to.
///

#[derive(Debug)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.0.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

///
/// StoreContext
///
/// Shared handles consumed by stores and wrappers. Cheap to clone.
///

#[derive(Clone)]
pub struct StoreContext {
    clock: Arc<dyn Clock>,
    triggers: Arc<TriggerRegistry>,
    dispatcher: Arc<dyn TriggerDispatcher>,
}

impl StoreContext {
    /// System clock, empty trigger registry, background dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            triggers: Arc::new(TriggerRegistry::new()),
            dispatcher: ThreadDispatcher::spawn_or_inline(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_triggers(mut self, triggers: Arc<TriggerRegistry>) -> Self {
        self.triggers = triggers;
        self
    }

    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn TriggerDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[must_use]
    pub fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    #[must_use]
    pub fn dispatcher(&self) -> &dyn TriggerDispatcher {
        self.dispatcher.as_ref()
    }
}

impl Default for StoreContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("now", &self.clock.now())
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}
