//! Sliding-window aggregation of call outcomes
//!
//! Two window shapes share one aggregate: a count-based ring of the last N
//! outcomes, and a time-based ring of one-second buckets. Totals are
//! maintained incrementally — the evicted sample (or expired bucket) is
//! subtracted before the new contribution is added — so a snapshot is an
//! O(1) read of the running counters, never a scan.
//!
//! The window itself is not synchronized; the breaker serializes access
//! through its state lock so that rate queries are linearizable with the
//! transition decisions made from them. Standalone users get the same
//! guarantee from `&mut self`.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

/// How a finished call is booked into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// Aggregate view over the window contents.
///
/// The rate fields are `None` while `total_calls` is below the configured
/// minimum number of calls; an undefined rate never triggers a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub total_calls: u32,
    pub failed_calls: u32,
    pub slow_calls: u32,
    pub slow_failed_calls: u32,
    pub total_duration: Duration,
    /// `100 · failed / total`, truncated toward zero to a whole percent.
    pub failure_rate_percent: Option<u8>,
    /// `100 · slow / total`, truncated toward zero to a whole percent.
    pub slow_call_rate_percent: Option<u8>,
}

/// One recorded call, as it sits in a count-window slot.
#[derive(Debug, Clone, Copy)]
struct Sample {
    duration: Duration,
    failed: bool,
    slow: bool,
}

/// Running totals shared by both window shapes.
#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    calls: u32,
    failed: u32,
    slow: u32,
    slow_failed: u32,
    duration: Duration,
}

impl Totals {
    fn add(&mut self, sample: Sample) {
        self.calls += 1;
        self.duration += sample.duration;
        if sample.failed {
            self.failed += 1;
        }
        if sample.slow {
            self.slow += 1;
        }
        if sample.failed && sample.slow {
            self.slow_failed += 1;
        }
    }

    fn remove(&mut self, sample: Sample) {
        self.calls -= 1;
        self.duration = self.duration.saturating_sub(sample.duration);
        if sample.failed {
            self.failed -= 1;
        }
        if sample.slow {
            self.slow -= 1;
        }
        if sample.failed && sample.slow {
            self.slow_failed -= 1;
        }
    }

    fn subtract(&mut self, other: &Totals) {
        self.calls -= other.calls;
        self.failed -= other.failed;
        self.slow -= other.slow;
        self.slow_failed -= other.slow_failed;
        self.duration = self.duration.saturating_sub(other.duration);
    }

    fn snapshot(&self, minimum_calls: u32) -> Snapshot {
        let defined = self.calls > 0 && self.calls >= minimum_calls;
        let rate = |numerator: u32| {
            defined.then(|| ((u64::from(numerator) * 100) / u64::from(self.calls)) as u8)
        };
        Snapshot {
            total_calls: self.calls,
            failed_calls: self.failed,
            slow_calls: self.slow,
            slow_failed_calls: self.slow_failed,
            total_duration: self.duration,
            failure_rate_percent: rate(self.failed),
            slow_call_rate_percent: rate(self.slow),
        }
    }
}

/// Circular buffer of the last N outcomes.
#[derive(Debug)]
struct CountWindow {
    slots: Box<[Option<Sample>]>,
    head: usize,
    totals: Totals,
}

impl CountWindow {
    fn new(size: u32) -> Self {
        Self {
            slots: vec![None; size as usize].into_boxed_slice(),
            head: 0,
            totals: Totals::default(),
        }
    }

    fn record(&mut self, sample: Sample) {
        if let Some(evicted) = self.slots[self.head].replace(sample) {
            self.totals.remove(evicted);
        }
        self.totals.add(sample);
        self.head = (self.head + 1) % self.slots.len();
    }
}

/// Ring of one-second buckets spanning the last N seconds.
#[derive(Debug)]
struct TimeWindow {
    buckets: Box<[Bucket]>,
    head: usize,
    totals: Totals,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    epoch_secs: u64,
    partial: Totals,
}

impl TimeWindow {
    fn new(size_secs: u32, now: Duration) -> Self {
        let bucket = Bucket {
            epoch_secs: now.as_secs(),
            partial: Totals::default(),
        };
        Self {
            buckets: vec![bucket; size_secs as usize].into_boxed_slice(),
            head: 0,
            totals: Totals::default(),
        }
    }

    /// Rotate expired buckets out of the totals, stamping fresh epochs.
    fn advance(&mut self, now: Duration) {
        let now_secs = now.as_secs();
        let latest = self.buckets[self.head].epoch_secs;
        if now_secs <= latest {
            return;
        }
        let len = self.buckets.len() as u64;
        let behind = now_secs - latest;
        let steps = behind.min(len);
        // When the whole window has expired, jump straight to the target
        // second instead of stamping epochs nobody will ever observe.
        let mut epoch = if behind > len { now_secs - steps } else { latest };
        for _ in 0..steps {
            epoch += 1;
            self.head = (self.head + 1) % self.buckets.len();
            let expired = self.buckets[self.head];
            self.totals.subtract(&expired.partial);
            self.buckets[self.head] = Bucket {
                epoch_secs: epoch,
                partial: Totals::default(),
            };
        }
    }

    fn record(&mut self, sample: Sample, now: Duration) {
        self.advance(now);
        self.buckets[self.head].partial.add(sample);
        self.totals.add(sample);
    }
}

#[derive(Debug)]
enum Shape {
    Count(CountWindow),
    Time(TimeWindow, Arc<dyn Clock>),
}

/// Bounded aggregator of call outcomes answering rate queries.
#[derive(Debug)]
pub struct SlidingWindow {
    slow_call_threshold: Duration,
    minimum_calls: u32,
    shape: Shape,
}

impl SlidingWindow {
    /// Window over the last `size` outcomes.
    ///
    /// The effective minimum number of calls is clamped to the window size:
    /// a full window always has defined rates.
    pub fn count_based(size: u32, minimum_calls: u32, slow_call_threshold: Duration) -> Self {
        Self {
            slow_call_threshold,
            minimum_calls: minimum_calls.min(size),
            shape: Shape::Count(CountWindow::new(size)),
        }
    }

    /// Window over the outcomes of the last `size_secs` seconds.
    pub fn time_based(
        size_secs: u32,
        minimum_calls: u32,
        slow_call_threshold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.monotonic();
        Self {
            slow_call_threshold,
            minimum_calls,
            shape: Shape::Time(TimeWindow::new(size_secs, now), clock),
        }
    }

    /// Record one outcome and return the updated aggregate.
    ///
    /// A call is slow iff `elapsed` meets or exceeds the slow-call
    /// threshold; a slow failure contributes to both numerators.
    pub fn record(&mut self, kind: OutcomeKind, elapsed: Duration) -> Snapshot {
        let sample = Sample {
            duration: elapsed,
            failed: kind == OutcomeKind::Failure,
            slow: elapsed >= self.slow_call_threshold,
        };
        match &mut self.shape {
            Shape::Count(window) => window.record(sample),
            Shape::Time(window, clock) => window.record(sample, clock.monotonic()),
        }
        self.snapshot()
    }

    /// Read the current aggregate without recording.
    pub fn snapshot(&mut self) -> Snapshot {
        match &mut self.shape {
            Shape::Count(window) => window.totals.snapshot(self.minimum_calls),
            Shape::Time(window, clock) => {
                window.advance(clock.monotonic());
                window.totals.snapshot(self.minimum_calls)
            }
        }
    }

    /// Drop every observation; subsequent queries see zeroed counters.
    pub fn reset(&mut self) {
        match &mut self.shape {
            Shape::Count(window) => *window = CountWindow::new(window.slots.len() as u32),
            Shape::Time(window, clock) => {
                *window = TimeWindow::new(window.buckets.len() as u32, clock.monotonic());
            }
        }
    }
}
