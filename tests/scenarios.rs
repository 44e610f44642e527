//! End-to-end breaker scenarios driven with literal values and a manual clock

use std::sync::Arc;
use std::time::Duration;

use fusebox::{CircuitBreaker, Config, Error, IntervalPolicy, ManualClock, State};

#[derive(Debug)]
struct Outage;

const ELAPSED: Duration = Duration::from_millis(10);

fn breaker(config: Config, clock: &Arc<ManualClock>) -> CircuitBreaker {
    CircuitBreaker::builder("scenario")
        .config(config)
        .clock(clock.clone())
        .build()
}

fn fail(breaker: &CircuitBreaker) {
    let permission = breaker.acquire_permission().expect("grant");
    breaker.on_error(ELAPSED, &Outage, permission);
}

fn succeed(breaker: &CircuitBreaker) {
    let permission = breaker.acquire_permission().expect("grant");
    breaker.on_success(ELAPSED, permission);
}

#[test]
fn three_failures_in_five_calls_open_the_breaker() {
    let clock = Arc::new(ManualClock::new());
    let config = Config::builder()
        .minimum_number_of_calls(5)
        .sliding_window_size(5)
        .failure_rate_threshold(50.0)
        .build()
        .unwrap();
    let breaker = breaker(config, &clock);

    fail(&breaker);
    fail(&breaker);
    fail(&breaker);
    succeed(&breaker);
    assert_eq!(breaker.state(), State::Closed, "4 of 5 outcomes recorded");

    // 5th outcome: failure rate 60% >= 50%
    succeed(&breaker);
    assert_eq!(breaker.state(), State::Open);
    assert_eq!(breaker.metrics().failure_rate_percent, Some(60));
}

#[test]
fn four_failures_below_minimum_keep_the_breaker_closed() {
    let clock = Arc::new(ManualClock::new());
    let config = Config::builder()
        .minimum_number_of_calls(5)
        .sliding_window_size(10)
        .failure_rate_threshold(50.0)
        .build()
        .unwrap();
    let breaker = breaker(config, &clock);

    for _ in 0..4 {
        fail(&breaker);
    }
    assert_eq!(breaker.state(), State::Closed);
    assert_eq!(breaker.metrics().failure_rate_percent, None);

    let permission = breaker
        .acquire_permission()
        .expect("closed breaker must grant");
    breaker.release_permission(permission);
}

#[test]
fn open_breaker_denies_at_fifty_millis_and_grants_at_one_hundred() {
    let clock = Arc::new(ManualClock::new());
    let config = Config::builder()
        .minimum_number_of_calls(2)
        .sliding_window_size(2)
        .failure_rate_threshold(50.0)
        .wait_duration_in_open_state(Duration::from_millis(100))
        .build()
        .unwrap();
    let breaker = breaker(config, &clock);

    fail(&breaker);
    fail(&breaker);
    assert_eq!(breaker.state(), State::Open);

    clock.advance(Duration::from_millis(50));
    let denied = breaker.acquire_permission().unwrap_err();
    assert!(matches!(
        denied,
        Error::CallNotPermitted {
            state: State::Open,
            ..
        }
    ));

    clock.advance(Duration::from_millis(50));
    let permission = breaker
        .acquire_permission()
        .expect("expiry reached, trial permitted");
    assert_eq!(breaker.state(), State::HalfOpen);
    breaker.release_permission(permission);
}

fn half_open_breaker(clock: &Arc<ManualClock>) -> CircuitBreaker {
    let config = Config::builder()
        .minimum_number_of_calls(2)
        .sliding_window_size(2)
        .failure_rate_threshold(50.0)
        .wait_duration_in_open_state(Duration::from_millis(100))
        .permitted_calls_in_half_open(3)
        .build()
        .unwrap();
    let breaker = breaker(config, clock);
    fail(&breaker);
    fail(&breaker);
    clock.advance(Duration::from_millis(100));
    breaker
}

#[test]
fn half_open_trial_below_threshold_closes() {
    let clock = Arc::new(ManualClock::new());
    let breaker = half_open_breaker(&clock);

    // {Success, Failed, Success}: 33% < 50%
    succeed(&breaker);
    fail(&breaker);
    succeed(&breaker);

    assert_eq!(breaker.state(), State::Closed);
}

#[test]
fn half_open_trial_at_threshold_reopens_with_fresh_expiry() {
    let clock = Arc::new(ManualClock::new());
    let breaker = half_open_breaker(&clock);

    // {Failed, Failed, Success}: 66% >= 50%
    fail(&breaker);
    fail(&breaker);
    succeed(&breaker);

    assert_eq!(breaker.state(), State::Open);

    clock.advance(Duration::from_millis(99));
    assert!(
        breaker.acquire_permission().is_err(),
        "the reopened breaker carries a fresh expiry"
    );
    clock.advance(Duration::from_millis(1));
    assert!(breaker.acquire_permission().is_ok());
}

#[test]
fn exponential_backoff_doubles_from_five_hundred_millis() {
    let policy = IntervalPolicy::exponential(Duration::from_millis(500), 2.0).unwrap();
    assert_eq!(policy.wait_duration(1).unwrap(), Duration::from_millis(500));
    assert_eq!(policy.wait_duration(2).unwrap(), Duration::from_millis(1000));
    assert_eq!(policy.wait_duration(3).unwrap(), Duration::from_millis(2000));
    assert_eq!(policy.wait_duration(4).unwrap(), Duration::from_millis(4000));
}

#[test]
fn release_then_acquire_round_trips_in_half_open() {
    let clock = Arc::new(ManualClock::new());
    let breaker = half_open_breaker(&clock);

    let permission = breaker.acquire_permission().expect("trial permit");
    assert_eq!(breaker.state(), State::HalfOpen);

    breaker.release_permission(permission);
    let permission = breaker
        .acquire_permission()
        .expect("released permit is grantable again");
    breaker.release_permission(permission);
}

#[test]
fn concurrent_callers_observe_consistent_state() {
    let config = Config::builder()
        .minimum_number_of_calls(10)
        .sliding_window_size(10)
        .failure_rate_threshold(50.0)
        .wait_duration_in_open_state(Duration::from_millis(1))
        .build()
        .unwrap();
    let breaker = CircuitBreaker::new("concurrent", config);

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let breaker = breaker.clone();
            scope.spawn(move || {
                for iteration in 0..200 {
                    match breaker.acquire_permission() {
                        Ok(permission) => {
                            if (worker + iteration) % 3 == 0 {
                                breaker.on_error(ELAPSED, &Outage, permission);
                            } else {
                                breaker.on_success(ELAPSED, permission);
                            }
                        }
                        Err(Error::CallNotPermitted { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            });
        }
    });

    let snapshot = breaker.metrics();
    assert!(
        snapshot.total_calls <= 10,
        "window never exceeds its size, saw {}",
        snapshot.total_calls
    );
}
