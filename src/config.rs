//! Circuit breaker configuration
//!
//! An immutable, validated parameter bundle. Build one through
//! [`Config::builder`]; out-of-range values fail `build()` with
//! [`Error::InvalidArgument`] naming the offending field. A breaker keeps
//! its config for life — construct a new breaker to change it.
//!
//! Error classification works over `&dyn Any`: error kinds are matched by
//! `TypeId`, the record-failure predicate inspects the value itself.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::errors::Error;

/// Predicate deciding whether a classified-recordable error counts as a
/// failure. Runs against the caller's raised error value.
pub type FailurePredicate = Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>;

/// Shape of the metrics window a breaker aggregates outcomes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlidingWindowKind {
    /// Last N calls.
    CountBased,
    /// Calls of the last N seconds.
    TimeBased,
}

/// How a raised error is booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Recorded as a failed call.
    Failure,
    /// Not recorded; the error still propagates to the caller.
    Ignored,
}

/// Immutable, validated circuit breaker parameters.
#[derive(Clone)]
pub struct Config {
    failure_rate_threshold: f32,
    slow_call_rate_threshold: f32,
    slow_call_duration_threshold: Duration,
    wait_duration_in_open_state: Duration,
    sliding_window_kind: SlidingWindowKind,
    sliding_window_size: u32,
    minimum_number_of_calls: u32,
    permitted_calls_in_half_open: u32,
    automatic_half_open_enabled: bool,
    writable_stack_trace_enabled: bool,
    record_failure_predicate: FailurePredicate,
    record_error_types: HashSet<TypeId>,
    ignore_error_types: HashSet<TypeId>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Look up a named base config in a caller-owned map.
    pub fn resolve_base<'a>(
        configs: &'a HashMap<String, Config>,
        name: &str,
    ) -> Result<&'a Config, Error> {
        configs
            .get(name)
            .ok_or_else(|| Error::ConfigurationNotFound(name.to_string()))
    }

    pub fn failure_rate_threshold(&self) -> f32 {
        self.failure_rate_threshold
    }

    pub fn slow_call_rate_threshold(&self) -> f32 {
        self.slow_call_rate_threshold
    }

    pub fn slow_call_duration_threshold(&self) -> Duration {
        self.slow_call_duration_threshold
    }

    pub fn wait_duration_in_open_state(&self) -> Duration {
        self.wait_duration_in_open_state
    }

    pub fn sliding_window_kind(&self) -> SlidingWindowKind {
        self.sliding_window_kind
    }

    pub fn sliding_window_size(&self) -> u32 {
        self.sliding_window_size
    }

    pub fn minimum_number_of_calls(&self) -> u32 {
        self.minimum_number_of_calls
    }

    pub fn permitted_calls_in_half_open(&self) -> u32 {
        self.permitted_calls_in_half_open
    }

    pub fn automatic_half_open_enabled(&self) -> bool {
        self.automatic_half_open_enabled
    }

    pub fn writable_stack_trace_enabled(&self) -> bool {
        self.writable_stack_trace_enabled
    }

    /// Classify a raised error value.
    ///
    /// Ignore-listed kinds are ignored outright. Otherwise the error must be
    /// on the record list (an empty list records everything) and pass the
    /// record-failure predicate to count as a failure. A panicking predicate
    /// classifies as ignored.
    pub fn classify_error(&self, error: &dyn Any) -> Classification {
        let kind = error.type_id();
        if self.ignore_error_types.contains(&kind) {
            return Classification::Ignored;
        }
        if !self.record_error_types.is_empty() && !self.record_error_types.contains(&kind) {
            return Classification::Ignored;
        }
        let predicate = AssertUnwindSafe(|| (self.record_failure_predicate)(error));
        let recorded = catch_unwind(predicate).unwrap_or_else(|_| {
            warn!("record-failure predicate panicked; error not recorded");
            false
        });
        if recorded {
            Classification::Failure
        } else {
            Classification::Ignored
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            wait_duration_in_open_state: Duration::from_secs(60),
            sliding_window_kind: SlidingWindowKind::CountBased,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            permitted_calls_in_half_open: 10,
            automatic_half_open_enabled: false,
            writable_stack_trace_enabled: true,
            record_failure_predicate: Arc::new(|_| true),
            record_error_types: HashSet::new(),
            ignore_error_types: HashSet::new(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("failure_rate_threshold", &self.failure_rate_threshold)
            .field("slow_call_rate_threshold", &self.slow_call_rate_threshold)
            .field(
                "slow_call_duration_threshold",
                &self.slow_call_duration_threshold,
            )
            .field("wait_duration_in_open_state", &self.wait_duration_in_open_state)
            .field("sliding_window_kind", &self.sliding_window_kind)
            .field("sliding_window_size", &self.sliding_window_size)
            .field("minimum_number_of_calls", &self.minimum_number_of_calls)
            .field("permitted_calls_in_half_open", &self.permitted_calls_in_half_open)
            .field("automatic_half_open_enabled", &self.automatic_half_open_enabled)
            .field("writable_stack_trace_enabled", &self.writable_stack_trace_enabled)
            .field("record_error_types", &self.record_error_types.len())
            .field("ignore_error_types", &self.ignore_error_types.len())
            .finish()
    }
}

/// Fluent builder for [`Config`].
#[derive(Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
        }
    }
}

impl ConfigBuilder {
    /// Failure rate percentage at or above which the breaker opens.
    /// Valid range `(0.0, 100.0]`.
    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Slow call rate percentage at or above which the breaker opens.
    /// Valid range `(0.0, 100.0]`.
    pub fn slow_call_rate_threshold(mut self, percent: f32) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    /// Duration at or above which a call counts as slow.
    pub fn slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_call_duration_threshold = threshold;
        self
    }

    /// How long an open breaker stays open before permitting trial calls.
    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    /// Window shape: last N calls or last N seconds.
    pub fn sliding_window_kind(mut self, kind: SlidingWindowKind) -> Self {
        self.config.sliding_window_kind = kind;
        self
    }

    /// Window size: a call count or a span in seconds, per the window kind.
    pub fn sliding_window_size(mut self, size: u32) -> Self {
        self.config.sliding_window_size = size;
        self
    }

    /// Floor below which rates are undefined and cannot trigger transitions.
    pub fn minimum_number_of_calls(mut self, calls: u32) -> Self {
        self.config.minimum_number_of_calls = calls;
        self
    }

    /// Size of the half-open trial permit pool.
    pub fn permitted_calls_in_half_open(mut self, permits: u32) -> Self {
        self.config.permitted_calls_in_half_open = permits;
        self
    }

    /// Transition open breakers to half-open on a scheduler timer instead of
    /// lazily on the next permission request.
    pub fn automatic_half_open_enabled(mut self, enabled: bool) -> Self {
        self.config.automatic_half_open_enabled = enabled;
        self
    }

    /// Advisory flag carried on `CallNotPermitted` errors.
    pub fn writable_stack_trace_enabled(mut self, enabled: bool) -> Self {
        self.config.writable_stack_trace_enabled = enabled;
        self
    }

    /// Predicate consulted for errors that passed the kind filters.
    pub fn record_failure_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn Any) -> bool + Send + Sync + 'static,
    {
        self.config.record_failure_predicate = Arc::new(predicate);
        self
    }

    /// Only record errors of the listed kinds. An empty list records all
    /// kinds that are not ignore-listed.
    pub fn record_error<E: Any>(mut self) -> Self {
        self.config.record_error_types.insert(TypeId::of::<E>());
        self
    }

    /// Never record errors of the listed kinds.
    pub fn ignore_error<E: Any>(mut self) -> Self {
        self.config.ignore_error_types.insert(TypeId::of::<E>());
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<Config, Error> {
        let config = self.config;
        check_rate_threshold("failure_rate_threshold", config.failure_rate_threshold)?;
        check_rate_threshold("slow_call_rate_threshold", config.slow_call_rate_threshold)?;
        if config.slow_call_duration_threshold.is_zero() {
            return Err(Error::invalid_argument(
                "slow_call_duration_threshold",
                "must be at least 1 ns",
            ));
        }
        if config.wait_duration_in_open_state < Duration::from_millis(1) {
            return Err(Error::invalid_argument(
                "wait_duration_in_open_state",
                "must be at least 1 ms",
            ));
        }
        if config.sliding_window_size < 1 {
            return Err(Error::invalid_argument(
                "sliding_window_size",
                "must be at least 1",
            ));
        }
        if config.minimum_number_of_calls < 1 {
            return Err(Error::invalid_argument(
                "minimum_number_of_calls",
                "must be at least 1",
            ));
        }
        if config.permitted_calls_in_half_open < 1 {
            return Err(Error::invalid_argument(
                "permitted_calls_in_half_open",
                "must be at least 1",
            ));
        }
        Ok(config)
    }
}

impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

fn check_rate_threshold(field: &'static str, percent: f32) -> Result<(), Error> {
    if percent.is_nan() || percent <= 0.0 || percent > 100.0 {
        return Err(Error::invalid_argument(
            field,
            format!("{percent} is outside (0.0, 100.0]"),
        ));
    }
    Ok(())
}
