//! Synchronous lifecycle notifications around compaction.
//!
//! Listeners run in registration order on the caller's task, before
//! [`EventBus::fire`] returns. A listener error stops the fan-out and is
//! returned to the caller unchanged; nothing is retried.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use thiserror::Error;

use crate::{
    compaction::{LoadContext, MergePlan},
    table::Table,
};

/// Point in the compaction lifecycle an event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
    Pre,
    Post,
    PreStatusUpdate,
}

/// A lifecycle notification with its payload.
#[derive(Debug, Clone, Copy)]
pub enum OperationEvent<'a> {
    /// Fired once per request, after validation and before any lock is taken.
    AlterTableCompactionPre { table: &'a Table },
    /// Fired once per request after the strategy completed.
    AlterTableCompactionPost { table: &'a Table },
    /// Fired right before segment status changes are persisted.
    AlterTableCompactionPreStatusUpdate {
        table: &'a Table,
        merge_plan: &'a MergePlan,
        load_context: &'a LoadContext,
    },
}

impl<'a> OperationEvent<'a> {
    pub fn phase(&self) -> EventPhase {
        match self {
            OperationEvent::AlterTableCompactionPre { .. } => EventPhase::Pre,
            OperationEvent::AlterTableCompactionPost { .. } => EventPhase::Post,
            OperationEvent::AlterTableCompactionPreStatusUpdate { .. } => {
                EventPhase::PreStatusUpdate
            }
        }
    }

    pub fn table(&self) -> &'a Table {
        match *self {
            OperationEvent::AlterTableCompactionPre { table }
            | OperationEvent::AlterTableCompactionPost { table }
            | OperationEvent::AlterTableCompactionPreStatusUpdate { table, .. } => table,
        }
    }
}

/// Mutable state shared by all events of one compaction request.
///
/// The orchestrator never reads it; listeners use it to carry state from the
/// pre event to the post event.
#[derive(Default)]
pub struct OperationContext {
    props: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.props.insert(key.into(), Box::new(value));
    }

    /// Value under `key` if it exists and has type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.props.get(key).and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.props.get_mut(key).and_then(|value| value.downcast_mut())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.props.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.props.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.props.keys()).finish()
    }
}

/// Failure raised by a listener, e.g. to veto an operation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ListenerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Receives lifecycle events.
pub trait OperationListener: Send + Sync {
    fn on_event(
        &self,
        event: &OperationEvent<'_>,
        context: &mut OperationContext,
    ) -> Result<(), ListenerError>;
}

impl<F> OperationListener for F
where
    F: Fn(&OperationEvent<'_>, &mut OperationContext) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(
        &self,
        event: &OperationEvent<'_>,
        context: &mut OperationContext,
    ) -> Result<(), ListenerError> {
        self(event, context)
    }
}

/// Ordered set of listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn OperationListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener; it runs after every listener registered before it.
    pub fn register(&self, listener: Arc<dyn OperationListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    /// Register a closure as a listener.
    pub fn register_fn<F>(&self, listener: F)
    where
        F: Fn(&OperationEvent<'_>, &mut OperationContext) -> Result<(), ListenerError>
            + Send
            + Sync
            + 'static,
    {
        self.register(Arc::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        match self.listeners.read() {
            Ok(listeners) => listeners.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn fire(
        &self,
        event: &OperationEvent<'_>,
        context: &mut OperationContext,
    ) -> Result<(), ListenerError> {
        let listeners: Vec<Arc<dyn OperationListener>> = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners {
            listener.on_event(event, context)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
