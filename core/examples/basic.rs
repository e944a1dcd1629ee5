//! Basic circuit breaker usage example

use circuit_gate::{BreakerRegistry, Config, Fallback, ManualClock};
use std::sync::Arc;

fn main() {
    println!("=== Circuit Breaker Basic Example ===\n");

    // A manual clock lets the example skip the open wait instantly
    let clock = Arc::new(ManualClock::new());
    let registry = BreakerRegistry::builder()
        .clock(clock.clone())
        .register(
            "payment_api",
            Config {
                sliding_window_size: 4,
                minimum_calls: 4,
                failure_rate_threshold: 50.0,
                wait_duration_open_secs: 5.0,
                permitted_calls_half_open: 2,
                ..Default::default()
            },
        )
        .build()
        .expect("valid configuration");

    registry.on_state_transition(|t| {
        let marker = match t.to {
            circuit_gate::CircuitState::Open => "🔴",
            circuit_gate::CircuitState::HalfOpen => "🟡",
            circuit_gate::CircuitState::Closed => "🟢",
        };
        println!("{} Circuit '{}': {} -> {}", marker, t.circuit, t.from, t.to);
    });

    let circuit = registry.get_or_create("payment_api");
    println!("Initial state: {}\n", circuit.state_name());

    // Simulate successful calls
    println!("--- Successful calls ---");
    for i in 1..=2 {
        match registry.execute("payment_api", move || Ok::<_, String>(format!("Payment {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {}\n", circuit.state_name());

    // Simulate failures
    println!("--- Triggering failures ---");
    for i in 1..=2 {
        match registry.execute("payment_api", move || {
            Err::<String, _>(format!("Payment failed {}", i))
        }) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("Metrics: {:?}", circuit.metrics());
    println!("State: {} (circuit opened)\n", circuit.state_name());

    // Rejected calls fold into the fallback, the work never runs
    println!("--- Attempting call while open ---");
    let value = registry
        .execute("payment_api", || Ok::<_, String>("live quote".to_string()))
        .fold(|| "cached quote".to_string());
    println!("Got: {:?}\n", value);

    // Let the open wait elapse and probe with trial calls
    println!("--- Recovering ---");
    clock.advance(5.0);
    for i in 1..=2 {
        match registry.execute("payment_api", move || Ok::<_, String>(format!("Trial {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {}", circuit.state_name());
}
