//! Circuit breaker state machine
//!
//! A breaker serves many concurrent callers through a shared handle. State,
//! generation counter, open-state expiry and the half-open permit pool move
//! together inside one short critical section, so the caller whose outcome
//! crosses a threshold is the one that performs the transition. User code
//! (predicates, event subscribers) always runs outside the lock.
//!
//! Outcomes are tagged with the generation of the permission they were
//! granted under; a report arriving after a transition is discarded rather
//! than polluting the fresh window.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::builder::CircuitBreakerBuilder;
use crate::clock::Clock;
use crate::config::{Classification, Config, SlidingWindowKind};
use crate::errors::Error;
use crate::events::{EventKind, EventSubscriber, Publisher};
use crate::metrics::{OutcomeKind, SlidingWindow, Snapshot};
use crate::scheduler::Scheduler;

/// Observable breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Permissions granted unconditionally; outcomes recorded.
    Closed,
    /// Permissions denied until the stored expiry.
    Open,
    /// A bounded pool of trial permits.
    HalfOpen,
    /// Always grants; never records.
    Disabled,
    /// Always denies; never records.
    ForcedOpen,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Open => "OPEN",
            State::HalfOpen => "HALF_OPEN",
            State::Disabled => "DISABLED",
            State::ForcedOpen => "FORCED_OPEN",
        };
        f.write_str(name)
    }
}

/// Token granting one caller the right to execute a protected operation.
///
/// Carries the generation it was granted under and must be resolved exactly
/// once; the type is not clonable so a permit cannot be reported twice.
#[must_use = "resolve the permission via on_success, on_error, or release_permission"]
#[derive(Debug)]
pub struct Permission {
    generation: u64,
}

/// Per-state data. Entering `Closed` or `HalfOpen` always builds a fresh
/// window; `Open` keeps the snapshot it tripped on for metrics reads.
enum Phase {
    Closed {
        window: SlidingWindow,
    },
    Open {
        expires_at: Duration,
        last: Snapshot,
    },
    HalfOpen {
        window: SlidingWindow,
        outstanding: u32,
        resolved: u32,
    },
    Disabled,
    ForcedOpen,
}

impl Phase {
    fn state(&self) -> State {
        match self {
            Phase::Closed { .. } => State::Closed,
            Phase::Open { .. } => State::Open,
            Phase::HalfOpen { .. } => State::HalfOpen,
            Phase::Disabled => State::Disabled,
            Phase::ForcedOpen => State::ForcedOpen,
        }
    }
}

/// State, generation and permit accounting, updated as one atomic step.
struct Cell {
    generation: u64,
    phase: Phase,
}

struct Shared {
    self_ref: Weak<Shared>,
    name: Arc<str>,
    config: Config,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<dyn Scheduler>>,
    publisher: Publisher,
    cell: Mutex<Cell>,
    not_permitted_calls: AtomicU64,
}

/// Shared-handle circuit breaker; clones observe the same instance.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Create a breaker with the given config and system defaults for clock
    /// and scheduler (use [`Self::builder`] for more options).
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        Self::builder(name).config(config).build()
    }

    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        config: Config,
        clock: Arc<dyn Clock>,
        scheduler: Option<Arc<dyn Scheduler>>,
        subscribers: Vec<EventSubscriber>,
    ) -> Self {
        let shared = Arc::new_cyclic(|self_ref| {
            let window = closed_window(&config, &clock);
            Shared {
                self_ref: self_ref.clone(),
                name: name.into(),
                config,
                clock,
                scheduler,
                publisher: Publisher::new(subscribers),
                cell: Mutex::new(Cell {
                    generation: 0,
                    phase: Phase::Closed { window },
                }),
                not_permitted_calls: AtomicU64::new(0),
            }
        });
        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Current state, without side effects.
    pub fn state(&self) -> State {
        self.shared.cell.lock().phase.state()
    }

    /// Aggregate over the current window. An open breaker reports the
    /// snapshot it tripped on; disabled and forced-open report zeroes.
    pub fn metrics(&self) -> Snapshot {
        let mut guard = self.shared.cell.lock();
        Shared::phase_metrics(&mut guard.phase)
    }

    /// Number of permission requests denied over the breaker's lifetime.
    pub fn not_permitted_calls(&self) -> u64 {
        self.shared.not_permitted_calls.load(Ordering::Relaxed)
    }

    /// Request the right to execute one protected call.
    ///
    /// An open breaker past its expiry transitions to half-open here and
    /// grants the first trial permit.
    pub fn acquire_permission(&self) -> Result<Permission, Error> {
        self.shared.acquire()
    }

    /// Report a successful call and re-evaluate transitions.
    pub fn on_success(&self, elapsed: Duration, permission: Permission) {
        self.shared
            .record(OutcomeKind::Success, elapsed, permission);
    }

    /// Classify `error`, record the outcome, and re-evaluate transitions.
    ///
    /// The error value stays with the caller; the breaker only observes it.
    pub fn on_error(&self, elapsed: Duration, error: &dyn Any, permission: Permission) {
        match self.shared.config.classify_error(error) {
            Classification::Failure => {
                self.shared
                    .record(OutcomeKind::Failure, elapsed, permission);
            }
            Classification::Ignored => self.shared.ignore(elapsed, permission),
        }
    }

    /// Return an unused permission without recording an outcome.
    pub fn release_permission(&self, permission: Permission) {
        self.shared.release(permission);
    }

    pub fn transition_to_closed(&self) {
        self.shared.admin_transition(State::Closed);
    }

    pub fn transition_to_open(&self) {
        self.shared.admin_transition(State::Open);
    }

    pub fn transition_to_half_open(&self) {
        self.shared.admin_transition(State::HalfOpen);
    }

    pub fn transition_to_disabled(&self) {
        self.shared.admin_transition(State::Disabled);
    }

    pub fn transition_to_forced_open(&self) {
        self.shared.admin_transition(State::ForcedOpen);
    }

    /// Drop all observations and return to a fresh closed state.
    pub fn reset(&self) {
        self.shared.reset();
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn acquire(&self) -> Result<Permission, Error> {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.cell.lock();
            let cell = &mut *guard;

            // lazy OPEN -> HALF_OPEN once the expiry has passed
            let expired = matches!(
                &cell.phase,
                Phase::Open { expires_at, .. } if self.clock.monotonic() >= *expires_at
            );
            if expired {
                let window = self.half_open_window();
                self.enter(
                    cell,
                    Phase::HalfOpen {
                        window,
                        outstanding: 0,
                        resolved: 0,
                    },
                    &mut events,
                );
            }

            match &mut cell.phase {
                Phase::Closed { .. } | Phase::Disabled => {
                    events.push(EventKind::PermissionAcquired);
                    Ok(Permission {
                        generation: cell.generation,
                    })
                }
                Phase::HalfOpen {
                    outstanding,
                    resolved,
                    ..
                } => {
                    if *outstanding + *resolved < self.config.permitted_calls_in_half_open() {
                        *outstanding += 1;
                        events.push(EventKind::PermissionAcquired);
                        Ok(Permission {
                            generation: cell.generation,
                        })
                    } else {
                        Err(self.deny(State::HalfOpen, &mut events))
                    }
                }
                Phase::Open { .. } => Err(self.deny(State::Open, &mut events)),
                Phase::ForcedOpen => Err(self.deny(State::ForcedOpen, &mut events)),
            }
        };
        self.flush(&events);
        result
    }

    fn record(&self, kind: OutcomeKind, elapsed: Duration, permission: Permission) {
        let mut events = Vec::new();
        {
            let mut guard = self.cell.lock();
            let cell = &mut *guard;
            if permission.generation != cell.generation {
                debug!(
                    breaker = %self.name,
                    stale = permission.generation,
                    current = cell.generation,
                    "discarding outcome reported under a stale generation"
                );
                return;
            }
            match &mut cell.phase {
                Phase::Closed { window } => {
                    let snapshot = window.record(kind, elapsed);
                    events.push(outcome_event(kind, elapsed));
                    if self.threshold_exceeded(&snapshot) {
                        let expires_at =
                            self.clock.monotonic() + self.config.wait_duration_in_open_state();
                        self.enter(
                            cell,
                            Phase::Open {
                                expires_at,
                                last: snapshot,
                            },
                            &mut events,
                        );
                    }
                }
                Phase::HalfOpen {
                    window,
                    outstanding,
                    resolved,
                } => {
                    *outstanding = (*outstanding).saturating_sub(1);
                    *resolved += 1;
                    let resolved_count = *resolved;
                    let snapshot = window.record(kind, elapsed);
                    events.push(outcome_event(kind, elapsed));
                    // the reporter of the final permitted outcome decides
                    if resolved_count >= self.config.permitted_calls_in_half_open() {
                        if self.threshold_exceeded(&snapshot) {
                            let expires_at =
                                self.clock.monotonic() + self.config.wait_duration_in_open_state();
                            self.enter(
                                cell,
                                Phase::Open {
                                    expires_at,
                                    last: snapshot,
                                },
                                &mut events,
                            );
                        } else {
                            let window = self.closed_window();
                            self.enter(cell, Phase::Closed { window }, &mut events);
                        }
                    }
                }
                // Disabled never records; Open and ForcedOpen cannot hold a
                // live generation because every transition into them bumps it
                Phase::Disabled | Phase::Open { .. } | Phase::ForcedOpen => {}
            }
        }
        self.flush(&events);
    }

    /// Book an ignored error: no recording, and in half-open the permit goes
    /// back to the pool instead of consuming an outcome slot.
    fn ignore(&self, elapsed: Duration, permission: Permission) {
        let mut events = Vec::new();
        {
            let mut guard = self.cell.lock();
            let cell = &mut *guard;
            if permission.generation != cell.generation {
                return;
            }
            match &mut cell.phase {
                Phase::HalfOpen { outstanding, .. } => {
                    *outstanding = (*outstanding).saturating_sub(1);
                    events.push(EventKind::ErrorIgnored { elapsed });
                }
                Phase::Disabled => {}
                _ => events.push(EventKind::ErrorIgnored { elapsed }),
            }
        }
        self.flush(&events);
    }

    fn release(&self, permission: Permission) {
        let mut guard = self.cell.lock();
        let cell = &mut *guard;
        if permission.generation != cell.generation {
            return;
        }
        if let Phase::HalfOpen { outstanding, .. } = &mut cell.phase {
            *outstanding = (*outstanding).saturating_sub(1);
        }
    }

    fn admin_transition(&self, target: State) {
        let mut events = Vec::new();
        {
            let mut guard = self.cell.lock();
            let cell = &mut *guard;
            if cell.phase.state() == target {
                // idempotent: no event, no generation bump
                return;
            }
            let next = match target {
                State::Closed => Phase::Closed {
                    window: self.closed_window(),
                },
                State::Open => {
                    let last = Self::phase_metrics(&mut cell.phase);
                    Phase::Open {
                        expires_at: self.clock.monotonic()
                            + self.config.wait_duration_in_open_state(),
                        last,
                    }
                }
                State::HalfOpen => Phase::HalfOpen {
                    window: self.half_open_window(),
                    outstanding: 0,
                    resolved: 0,
                },
                State::Disabled => Phase::Disabled,
                State::ForcedOpen => Phase::ForcedOpen,
            };
            self.enter(cell, next, &mut events);
        }
        self.flush(&events);
    }

    fn reset(&self) {
        let mut events = Vec::new();
        {
            let mut guard = self.cell.lock();
            let cell = &mut *guard;
            cell.generation += 1;
            cell.phase = Phase::Closed {
                window: self.closed_window(),
            };
            debug!(breaker = %self.name, generation = cell.generation, "reset to closed");
            events.push(EventKind::Reset);
        }
        self.flush(&events);
    }

    /// Perform a state transition: bump the generation, swap the phase,
    /// queue the event, and arm the half-open timer when entering open.
    fn enter(&self, cell: &mut Cell, next: Phase, events: &mut Vec<EventKind>) {
        let from = cell.phase.state();
        let to = next.state();
        cell.generation += 1;
        cell.phase = next;
        debug!(
            breaker = %self.name,
            %from,
            %to,
            generation = cell.generation,
            "state transition"
        );
        events.push(EventKind::StateTransition { from, to });
        if to == State::Open && self.config.automatic_half_open_enabled() {
            self.schedule_half_open(cell.generation, self.config.wait_duration_in_open_state());
        }
    }

    fn schedule_half_open(&self, generation: u64, delay: Duration) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let breaker = self.self_ref.clone();
        scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(shared) = breaker.upgrade() {
                    shared.try_scheduled_half_open(generation);
                }
            }),
        );
    }

    /// Timer callback armed at transition to open. Stale timers — any
    /// transition since scheduling, administrative or otherwise — see a
    /// different generation and do nothing.
    fn try_scheduled_half_open(&self, scheduled_generation: u64) {
        let mut events = Vec::new();
        {
            let mut guard = self.cell.lock();
            let cell = &mut *guard;
            if cell.generation != scheduled_generation {
                return;
            }
            let Phase::Open { expires_at, .. } = &cell.phase else {
                return;
            };
            if self.clock.monotonic() < *expires_at {
                return;
            }
            let window = self.half_open_window();
            self.enter(
                cell,
                Phase::HalfOpen {
                    window,
                    outstanding: 0,
                    resolved: 0,
                },
                &mut events,
            );
        }
        self.flush(&events);
    }

    fn deny(&self, state: State, events: &mut Vec<EventKind>) -> Error {
        self.not_permitted_calls.fetch_add(1, Ordering::Relaxed);
        events.push(EventKind::CallNotPermitted);
        Error::CallNotPermitted {
            breaker: self.name.to_string(),
            state,
            writable_stack_trace: self.config.writable_stack_trace_enabled(),
        }
    }

    fn threshold_exceeded(&self, snapshot: &Snapshot) -> bool {
        // failure rate is evaluated before the slow rate; both inclusive
        snapshot
            .failure_rate_percent
            .is_some_and(|rate| f32::from(rate) >= self.config.failure_rate_threshold())
            || snapshot
                .slow_call_rate_percent
                .is_some_and(|rate| f32::from(rate) >= self.config.slow_call_rate_threshold())
    }

    fn closed_window(&self) -> SlidingWindow {
        closed_window(&self.config, &self.clock)
    }

    /// Trial window sized to the permit pool; the effective minimum clamps
    /// to the pool size so the exhaustion decision has defined rates.
    fn half_open_window(&self) -> SlidingWindow {
        SlidingWindow::count_based(
            self.config.permitted_calls_in_half_open(),
            self.config.minimum_number_of_calls(),
            self.config.slow_call_duration_threshold(),
        )
    }

    fn phase_metrics(phase: &mut Phase) -> Snapshot {
        match phase {
            Phase::Closed { window } | Phase::HalfOpen { window, .. } => window.snapshot(),
            Phase::Open { last, .. } => *last,
            Phase::Disabled | Phase::ForcedOpen => Snapshot::default(),
        }
    }

    fn flush(&self, events: &[EventKind]) {
        for kind in events {
            self.publisher.publish(&self.name, *kind);
        }
    }
}

fn closed_window(config: &Config, clock: &Arc<dyn Clock>) -> SlidingWindow {
    match config.sliding_window_kind() {
        SlidingWindowKind::CountBased => SlidingWindow::count_based(
            config.sliding_window_size(),
            config.minimum_number_of_calls(),
            config.slow_call_duration_threshold(),
        ),
        SlidingWindowKind::TimeBased => SlidingWindow::time_based(
            config.sliding_window_size(),
            config.minimum_number_of_calls(),
            config.slow_call_duration_threshold(),
            Arc::clone(clock),
        ),
    }
}

fn outcome_event(kind: OutcomeKind, elapsed: Duration) -> EventKind {
    match kind {
        OutcomeKind::Success => EventKind::SuccessRecorded { elapsed },
        OutcomeKind::Failure => EventKind::FailureRecorded { elapsed },
    }
}
