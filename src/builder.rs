//! Fluent construction of circuit breakers

use std::sync::Arc;

use crate::circuit::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::events::{Event, EventSubscriber};
use crate::scheduler::Scheduler;

/// Builder assembling a [`CircuitBreaker`] with its injected collaborators.
///
/// Clock, scheduler and event subscribers are fixed at build time; the
/// config can be validated separately and reused across breakers.
pub struct CircuitBreakerBuilder {
    name: String,
    config: Config,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<dyn Scheduler>>,
    subscribers: Vec<EventSubscriber>,
}

impl CircuitBreakerBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: Arc::new(SystemClock::new()),
            scheduler: None,
            subscribers: Vec::new(),
        }
    }

    /// Use a previously validated config instead of the defaults.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Substitute the monotonic time source (tests drive a manual clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Executor for the automatic open-to-half-open timer. Without one the
    /// transition stays lazy even when the config enables it.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Subscribe to the breaker's event stream.
    pub fn on_event<F>(mut self, subscriber: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(subscriber));
        self
    }

    pub fn build(self) -> CircuitBreaker {
        CircuitBreaker::from_parts(
            self.name,
            self.config,
            self.clock,
            self.scheduler,
            self.subscribers,
        )
    }
}

impl std::fmt::Debug for CircuitBreakerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("scheduler", &self.scheduler.is_some())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
