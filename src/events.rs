//! Event stream for circuit breaker observability
//!
//! Every significant breaker action publishes an [`Event`] to the
//! subscribers registered at build time. Subscriber panics are contained so
//! a misbehaving listener cannot take the breaker down with it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::circuit::State;

/// A single published breaker event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Name of the breaker instance that produced the event.
    pub breaker: Arc<str>,
    /// Wall-clock time at publication.
    pub at: SystemTime,
    pub kind: EventKind,
}

/// Event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A permission was granted to a caller.
    PermissionAcquired,
    /// A permission request was denied.
    CallNotPermitted,
    /// A successful call outcome was recorded.
    SuccessRecorded { elapsed: Duration },
    /// A failed call outcome was recorded.
    FailureRecorded { elapsed: Duration },
    /// A caller error was classified as ignored and not recorded.
    ErrorIgnored { elapsed: Duration },
    /// The state machine moved between states.
    StateTransition { from: State, to: State },
    /// The breaker was reset to a fresh closed state.
    Reset,
}

/// Subscriber callback invoked for every published event.
pub type EventSubscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// Fan-out of events to the build-time subscriber list.
#[derive(Clone)]
pub(crate) struct Publisher {
    subscribers: Arc<[EventSubscriber]>,
}

impl Publisher {
    pub(crate) fn new(subscribers: Vec<EventSubscriber>) -> Self {
        Self {
            subscribers: subscribers.into(),
        }
    }

    /// Publish one event to every subscriber, containing panics.
    pub(crate) fn publish(&self, breaker: &Arc<str>, kind: EventKind) {
        if self.subscribers.is_empty() {
            return;
        }
        let event = Event {
            breaker: Arc::clone(breaker),
            at: SystemTime::now(),
            kind,
        };
        for subscriber in self.subscribers.iter() {
            let hook = AssertUnwindSafe(|| subscriber(&event));
            if catch_unwind(hook).is_err() {
                warn!(breaker = %event.breaker, ?kind, "event subscriber panicked");
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
