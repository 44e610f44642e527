//! Fusebox - circuit breaker core with retry interval policies
//!
//! This crate provides the hard kernel of a resilience library:
//! - A concurrent five-state circuit breaker (closed, open, half-open,
//!   disabled, forced-open) whose transitions are driven by statistical
//!   aggregates over a sliding window of call outcomes
//! - Count-based and time-based outcome windows with O(1) snapshot reads
//! - A family of retry interval policies (fixed, randomized, exponential,
//!   exponential-randomized, custom)
//!
//! The breaker exposes an `acquire_permission` / `on_success` / `on_error`
//! surface; ergonomic call wrappers belong to higher layers.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use fusebox::{CircuitBreaker, Config};
//!
//! let config = Config::builder()
//!     .sliding_window_size(10)
//!     .minimum_number_of_calls(5)
//!     .failure_rate_threshold(50.0)
//!     .build()
//!     .unwrap();
//!
//! let breaker = CircuitBreaker::builder("payment_api")
//!     .config(config)
//!     .build();
//!
//! match breaker.acquire_permission() {
//!     Ok(permission) => {
//!         // run the protected call, then report its outcome
//!         breaker.on_success(Duration::from_millis(12), permission);
//!     }
//!     Err(denied) => println!("{denied}"),
//! }
//! ```

pub mod builder;
pub mod circuit;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod interval;
pub mod metrics;
pub mod scheduler;

pub use builder::CircuitBreakerBuilder;
pub use circuit::{CircuitBreaker, Permission, State};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Classification, Config, ConfigBuilder, FailurePredicate, SlidingWindowKind};
pub use errors::Error;
pub use events::{Event, EventKind, EventSubscriber};
pub use interval::{
    DEFAULT_INITIAL_INTERVAL, DEFAULT_MULTIPLIER, DEFAULT_RANDOMIZATION_FACTOR, IntervalPolicy,
};
pub use metrics::{OutcomeKind, SlidingWindow, Snapshot};
pub use scheduler::{Scheduler, ThreadScheduler};
