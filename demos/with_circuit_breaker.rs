//! Circuit breaker example demonstrating resilience patterns.
//!
//! This example shows how to:
//! - Wrap calls to an unreliable dependency with a circuit breaker
//! - Configure failure thresholds and timeouts
//! - Handle open circuit states
//! - Watch state transitions and metrics
//!
//! Run with: cargo run --example with_circuit_breaker

use bulwark::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A dependency that fails a configurable number of times before recovering.
struct Flaky {
    failures_left: AtomicU32,
}

impl Flaky {
    async fn call(&self) -> Result<&'static str, std::io::Error> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "upstream refused connection",
            ));
        }
        Ok("pong")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Circuit Breaker Example ===\n");

    let config = CircuitBreakerConfig::new()
        .with_name("upstream")
        .with_failure_threshold(3)
        .with_reset_timeout(Duration::from_secs(2))
        .with_half_open_max_calls(2)
        .with_call_timeout(Duration::from_secs(1));

    println!("Circuit Breaker Configuration:");
    println!("  Failure threshold: {}", config.failure_threshold);
    println!("  Reset timeout: {:?}", config.reset_timeout);
    println!("  Half-open successes to close: {}", config.half_open_max_calls);
    println!();

    let breaker = Arc::new(CircuitBreaker::new(config));
    let upstream = Flaky {
        failures_left: AtomicU32::new(3),
    };

    // Print every transition as it happens
    let mut events = breaker.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(CircuitEvent::StateChanged { name, from, to, .. }) = events.recv().await {
            println!("  >> circuit '{}' moved {} -> {}", name, from, to);
        }
    });

    println!("Sending requests to trigger the circuit breaker...\n");

    for i in 1..=6 {
        println!("Request #{}: circuit is {}", i, breaker.phase());
        match breaker.execute(|| upstream.call()).await {
            Ok(reply) => println!("  Success: {}", reply),
            Err(e) if e.is_rejected() => println!("  Rejected: {}", e),
            Err(e) => println!("  Failed: {}", e),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!("\nWaiting for the reset timeout...");
    tokio::time::sleep(Duration::from_secs(2)).await;

    println!("\n=== Demonstrating Recovery ===\n");

    for i in 1..=4 {
        println!("Request #{}: circuit is {}", i, breaker.phase());
        match breaker.execute(|| upstream.call()).await {
            Ok(reply) => println!("  Success: {}", reply),
            Err(e) => println!("  Error: {}", e),
        }
    }

    let metrics = breaker.metrics();
    println!(
        "\nFinal state: {} ({} calls, {} ok, {} failed, {} rejected, success rate {:.0}%)",
        breaker.phase(),
        metrics.total_calls,
        metrics.successful_calls,
        metrics.failed_calls,
        metrics.rejected_calls,
        metrics.success_rate() * 100.0
    );
    println!("Snapshot: {:#?}", breaker.state());

    drop(breaker);
    let _ = watcher.await;

    println!("\n=== Example Complete ===");
    Ok(())
}
