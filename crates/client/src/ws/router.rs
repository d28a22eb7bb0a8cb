//! Event routing between the channel's wire listeners and business handlers.
//!
//! Wire listeners live as long as the connection does, while the handlers
//! they should run are replaced whenever the consuming logic rebuilds them.
//! Each listener is therefore a trampoline: it resolves the current handler
//! from the table at call time. Replacing the table never touches the
//! connection.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// A business handler for one event name.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Event name -> handler.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.insert(event, handler);
        self
    }

    pub fn insert<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers.insert(event.into(), Arc::new(handler));
    }

    pub fn get(&self, event: &str) -> Option<&Handler> {
        self.handlers.get(event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("events", &self.event_names())
            .finish()
    }
}

/// Result of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// No handler registered for the event name.
    Unhandled,
    /// The handler panicked; the panic was contained.
    Failed,
}

/// Holds the current handler table and dispatches through it.
#[derive(Debug, Default)]
pub struct EventRouter {
    table: RwLock<Arc<HandlerTable>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a whole new table. Returns the table it replaced.
    pub fn replace(&self, table: HandlerTable) -> Arc<HandlerTable> {
        let mut current = self.table.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, Arc::new(table))
    }

    /// The table as of now.
    pub fn snapshot(&self) -> Arc<HandlerTable> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.snapshot().contains(event)
    }

    /// Run the handler currently registered for `event`.
    ///
    /// The table lock is released before the handler runs, so a handler may
    /// itself call [`EventRouter::replace`].
    pub fn dispatch(&self, event: &str, payload: &Value) -> DispatchOutcome {
        let Some(handler) = self.snapshot().get(event).cloned() else {
            crate::log_debug!("No handler for event '{}', ignoring", event);
            return DispatchOutcome::Unhandled;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(()) => DispatchOutcome::Handled,
            Err(_) => {
                crate::log_error!("Handler for event '{}' panicked", event);
                DispatchOutcome::Failed
            }
        }
    }

    /// A stable listener for one event name, suitable for attaching to a
    /// wire-level event source exactly once.
    pub fn trampoline(self: &Arc<Self>, event: impl Into<String>) -> impl Fn(&Value) + Send + Sync + 'static {
        let router = Arc::clone(self);
        let event = event.into();
        move |payload: &Value| {
            router.dispatch(&event, payload);
        }
    }
}
