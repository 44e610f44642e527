//! Deferred execution for the automatic open-to-half-open transition
//!
//! The core never owns a timer thread; it receives a [`Scheduler`] by
//! dependency and registers a single one-shot callback when a breaker with
//! automatic transitions enters the open state.

use std::time::Duration;

/// Runs a task once after a delay.
///
/// `schedule` must return without executing the task; the breaker arms the
/// timer while holding its state lock.
pub trait Scheduler: Send + Sync + std::fmt::Debug {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);
}

/// Scheduler backed by a one-shot sleeper thread per task.
///
/// Adequate for the rare open-state expiry callback; anything busier should
/// supply its own executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl ThreadScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            task();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_thread_scheduler_runs_task_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        let scheduler = ThreadScheduler::new();
        scheduler.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                fired_clone.store(true, Ordering::SeqCst);
            }),
        );

        assert!(!fired.load(Ordering::SeqCst), "task ran before its delay");
        std::thread::sleep(Duration::from_millis(100));
        assert!(fired.load(Ordering::SeqCst), "task never ran");
    }
}
