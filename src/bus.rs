//! Named publish/subscribe fan-out.
//!
//! DESIGN
//! ======
//! Subscriptions live in one registration-ordered list. `publish` snapshots
//! the matching handlers under the lock, drops one-shot entries, releases the
//! lock, and only then invokes the handlers. Handlers may therefore subscribe
//! or unsubscribe (including themselves) while an event is being delivered.
//!
//! A subscription may carry a correlation filter. It then ignores events
//! correlated to a different request, but still receives uncorrelated ones
//! so servers that never echo ids keep working.
//!
//! ERROR HANDLING
//! ==============
//! A handler that returns `Err` or panics is logged and skipped; delivery to
//! the remaining handlers continues.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// A named event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: String,
    /// Request id echoed by the server, when the event answers a request.
    pub correlation_id: Option<String>,
    pub data: Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self { kind: kind.into(), correlation_id: None, data }
    }

    #[must_use]
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Handle returned by the subscribe methods; pass to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: String,
    correlation: Option<String>,
    once: bool,
    handler: Handler,
}

impl Subscription {
    fn matches(&self, event: &Event) -> bool {
        if self.kind != event.kind {
            return false;
        }
        match (&self.correlation, &event.correlation_id) {
            (Some(wanted), Some(got)) => wanted == got,
            _ => true,
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// Cheaply cloneable handle to a shared subscription registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every future `kind` event.
    pub fn subscribe<F>(&self, kind: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(kind.into(), None, false, Arc::new(handler))
    }

    /// Register `handler` for the next `kind` event only.
    pub fn subscribe_once<F>(&self, kind: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(kind.into(), None, true, Arc::new(handler))
    }

    /// Like [`subscribe_once`](Self::subscribe_once), but events correlated to
    /// a different request id pass this subscription by.
    pub fn subscribe_once_correlated<F>(
        &self,
        kind: impl Into<String>,
        correlation_id: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(kind.into(), Some(correlation_id.into()), true, Arc::new(handler))
    }

    /// Remove a registration. Returns `false` if it already fired or was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        let before = registry.subscriptions.len();
        registry.subscriptions.retain(|sub| sub.id != id);
        registry.subscriptions.len() != before
    }

    /// Deliver `event` to every matching handler in subscription order.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, event: &Event) -> usize {
        let handlers: Vec<Handler> = {
            let mut registry = self.lock();
            let mut selected = Vec::new();
            registry.subscriptions.retain(|sub| {
                if !sub.matches(event) {
                    return true;
                }
                selected.push(Arc::clone(&sub.handler));
                !sub.once
            });
            selected
        };

        for handler in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(event = %event.kind, %error, "event handler failed");
                }
                Err(_) => {
                    tracing::warn!(event = %event.kind, "event handler panicked");
                }
            }
        }
        handlers.len()
    }

    /// Shorthand for publishing an uncorrelated event.
    pub fn emit(&self, kind: &str, data: Value) -> usize {
        self.publish(&Event::new(kind, data))
    }

    /// Number of live registrations for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: &str) -> usize {
        self.lock().subscriptions.iter().filter(|sub| sub.kind == kind).count()
    }

    /// Total number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, kind: String, correlation: Option<String>, once: bool, handler: Handler) -> SubscriptionId {
        let mut registry = self.lock();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.subscriptions.push(Subscription { id, kind, correlation, once, handler });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;
