//! Basic circuit breaker usage walkthrough

use std::time::Duration;

use fusebox::{CircuitBreaker, Config, Error, EventKind};

#[derive(Debug)]
struct UpstreamDown;

fn main() {
    println!("=== Circuit Breaker Basic Example ===\n");

    let config = Config::builder()
        .sliding_window_size(5)
        .minimum_number_of_calls(3)
        .failure_rate_threshold(50.0)
        .wait_duration_in_open_state(Duration::from_millis(200))
        .permitted_calls_in_half_open(2)
        .build()
        .expect("valid config");

    let breaker = CircuitBreaker::builder("payment_api")
        .config(config)
        .on_event(|event| {
            if let EventKind::StateTransition { from, to } = event.kind {
                println!("  [{}] {} -> {}", event.breaker, from, to);
            }
        })
        .build();

    println!("Initial state: {}\n", breaker.state());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        let permission = breaker.acquire_permission().expect("closed grants");
        println!("✓ payment {i}");
        breaker.on_success(Duration::from_millis(12), permission);
    }

    println!("\n--- Triggering failures ---");
    for i in 1..=3 {
        match breaker.acquire_permission() {
            Ok(permission) => {
                println!("✗ payment failed {i}");
                breaker.on_error(Duration::from_millis(40), &UpstreamDown, permission);
            }
            Err(denied) => println!("✗ {denied}"),
        }
    }
    println!("State: {}\n", breaker.state());

    println!("--- Attempting a call while open ---");
    match breaker.acquire_permission() {
        Ok(permission) => breaker.release_permission(permission),
        Err(denied @ Error::CallNotPermitted { .. }) => println!("✗ {denied}"),
        Err(other) => println!("✗ unexpected: {other}"),
    }
    println!("Denied so far: {}\n", breaker.not_permitted_calls());

    println!("--- Waiting out the open state ---");
    std::thread::sleep(Duration::from_millis(250));
    for _ in 0..2 {
        let permission = breaker.acquire_permission().expect("trial permit");
        breaker.on_success(Duration::from_millis(10), permission);
    }
    println!("State after trial calls: {}\n", breaker.state());

    let snapshot = breaker.metrics();
    println!(
        "Window: {} calls, {} failed, failure rate {:?}",
        snapshot.total_calls, snapshot.failed_calls, snapshot.failure_rate_percent
    );
}
