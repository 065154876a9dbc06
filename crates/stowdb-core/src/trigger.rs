//! Module: trigger
//! Responsibility: post-write handler registry and the dispatch seam.
//! Does not own: the decision of when to fire (see `wrap::trigger`).
//! Boundary: handler failures are logged here and never reach the writer.

use crate::record::Record;
use parking_lot::RwLock;
use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, mpsc},
    thread,
};
use thiserror::Error as ThisError;

///
/// TriggerKind
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TriggerKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        write!(f, "{label}")
    }
}

///
/// TriggerEvent
///
/// Payload handed to handlers. `item` is the stored post-write record for
/// creates and updates, and `None` for deletes.
///

#[derive(Clone, Debug, PartialEq)]
pub struct TriggerEvent {
    pub record: String,
    pub kind: TriggerKind,
    pub key: String,
    pub item: Option<Record>,
}

///
/// TriggerError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error("trigger '{handler}' failed: {message}")]
pub struct TriggerError {
    pub handler: String,
    pub message: String,
}

impl TriggerError {
    pub fn new(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

///
/// TriggerHandler
///

pub trait TriggerHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, event: &TriggerEvent) -> Result<(), TriggerError>;
}

///
/// FnHandler
/// Closure-backed handler.
///

struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> TriggerHandler for FnHandler<F>
where
    F: Fn(&TriggerEvent) -> Result<(), TriggerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &TriggerEvent) -> Result<(), TriggerError> {
        (self.f)(event)
    }
}

///
/// TriggerRegistry
///
/// Handlers keyed by (record name, kind), kept in registration order.
///

#[derive(Default)]
pub struct TriggerRegistry {
    entries: RwLock<Vec<Registration>>,
}

struct Registration {
    record: String,
    kind: TriggerKind,
    handler: Arc<dyn TriggerHandler>,
}

impl TriggerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        record: impl Into<String>,
        kind: TriggerKind,
        handler: Arc<dyn TriggerHandler>,
    ) {
        self.entries.write().push(Registration {
            record: record.into(),
            kind,
            handler,
        });
    }

    pub fn register_fn<F>(
        &self,
        record: impl Into<String>,
        kind: TriggerKind,
        name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&TriggerEvent) -> Result<(), TriggerError> + Send + Sync + 'static,
    {
        let handler = FnHandler {
            name: name.into(),
            f,
        };
        self.register(record, kind, Arc::new(handler));
    }

    #[must_use]
    pub fn find_handlers(&self, record: &str, kind: TriggerKind) -> Vec<Arc<dyn TriggerHandler>> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.record == record && entry.kind == kind)
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("handlers", &self.entries.read().len())
            .finish()
    }
}

///
/// TriggerDispatcher
///

pub trait TriggerDispatcher: Send + Sync {
    /// Hand `event` to `handler`. Must not report handler failure back.
    fn dispatch(&self, handler: Arc<dyn TriggerHandler>, event: TriggerEvent);

    /// Block until everything dispatched so far has run.
    fn flush(&self) {}
}

/// Run one handler, logging failures and swallowing panics.
fn run_handler(handler: &dyn TriggerHandler, event: &TriggerEvent) {
    match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(
            record = %event.record,
            kind = %event.kind,
            key = %event.key,
            error = %err,
            "trigger handler failed"
        ),
        Err(_) => tracing::warn!(
            record = %event.record,
            kind = %event.kind,
            key = %event.key,
            handler = handler.name(),
            "trigger handler panicked"
        ),
    }
}

///
/// InlineDispatcher
/// Runs handlers on the calling thread; failures are still isolated.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatcher;

impl TriggerDispatcher for InlineDispatcher {
    fn dispatch(&self, handler: Arc<dyn TriggerHandler>, event: TriggerEvent) {
        run_handler(handler.as_ref(), &event);
    }
}

///
/// ThreadDispatcher
///
/// Single background worker fed through a channel. The worker exits when
/// the dispatcher is dropped.
///

pub struct ThreadDispatcher {
    sender: mpsc::Sender<Job>,
}

enum Job {
    Run(Arc<dyn TriggerHandler>, TriggerEvent),
    Flush(mpsc::SyncSender<()>),
}

impl ThreadDispatcher {
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("stowdb-triggers".into())
            .spawn(move || {
                for job in receiver {
                    match job {
                        Job::Run(handler, event) => run_handler(handler.as_ref(), &event),
                        Job::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })?;

        Ok(Self { sender })
    }

    /// Background dispatcher, or inline dispatch when no thread can be spawned.
    #[must_use]
    pub fn spawn_or_inline() -> Arc<dyn TriggerDispatcher> {
        match Self::spawn() {
            Ok(dispatcher) => Arc::new(dispatcher),
            Err(err) => {
                tracing::warn!(error = %err, "trigger worker unavailable, dispatching inline");
                Arc::new(InlineDispatcher)
            }
        }
    }
}

impl TriggerDispatcher for ThreadDispatcher {
    fn dispatch(&self, handler: Arc<dyn TriggerHandler>, event: TriggerEvent) {
        if let Err(mpsc::SendError(job)) = self.sender.send(Job::Run(handler, event)) {
            // worker is gone; run here rather than lose the event
            if let Job::Run(handler, event) = job {
                run_handler(handler.as_ref(), &event);
            }
        }
    }

    fn flush(&self) {
        let (done, wait) = mpsc::sync_channel(1);
        if self.sender.send(Job::Flush(done)).is_ok() {
            let _ = wait.recv();
        }
    }
}

impl fmt::Debug for ThreadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ThreadDispatcher")
    }
}
