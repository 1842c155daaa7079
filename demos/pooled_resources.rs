//! Resource pool example with a custom factory.
//!
//! This example shows how to:
//! - Implement the `ResourceFactory` trait for your own resource
//! - Bound concurrent use with a pool
//! - Observe waiting, recycling and acquire timeouts
//! - Read pool statistics
//!
//! Run with: cargo run --example pooled_resources

use async_trait::async_trait;
use bulwark::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A pretend database session.
#[derive(Debug)]
struct Session {
    id: u64,
    queries: u64,
}

/// Opens sessions against a pretend database.
struct SessionFactory {
    next_id: AtomicU64,
}

#[async_trait]
impl ResourceFactory for SessionFactory {
    type Resource = Session;

    async fn create(&self) -> Result<Session, BoxError> {
        // Opening a session is slow
        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        println!("  [factory] opened session {}", id);
        Ok(Session { id, queries: 0 })
    }

    async fn cleanup(&self, session: &mut Session) {
        // Reset per-borrow state before the session is reused
        session.queries = 0;
    }

    async fn validate(&self, session: &Session) -> bool {
        session.id % 7 != 6
    }

    async fn destroy(&self, session: Session) {
        println!("  [factory] closed session {}", session.id);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Bulwark Resource Pool Example ===\n");

    let config = PoolConfig::new()
        .with_name("sessions")
        .with_size(1, 3)
        .with_acquire_timeout(Duration::from_millis(500))
        .with_idle_timeout(Duration::from_secs(1))
        .with_reap_interval(Some(Duration::from_millis(250)))
        .with_max_uses(5)
        .with_validation(true, false);

    let pool = ResourcePool::new(
        SessionFactory {
            next_id: AtomicU64::new(0),
        },
        config,
    )
    .await?;

    println!("Pool warmed: {:?}\n", pool.stats().total);

    // Run more workers than the pool allows; the extra ones wait in line
    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut session = pool.acquire().await?;
                session.queries += 1;
                println!(
                    "worker {} using session {} (use #{})",
                    worker,
                    session.id,
                    session.use_count()
                );
                tokio::time::sleep(Duration::from_millis(100)).await;
                pool.release(session).await
            })
        })
        .collect();

    for worker in workers {
        worker.await??;
    }

    // Hold every session so the next acquire times out
    println!("\n=== Demonstrating Acquire Timeout ===\n");
    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(pool.acquire().await?);
    }
    match pool.acquire().await {
        Ok(_) => println!("unexpectedly acquired a fourth session"),
        Err(e) => println!("fourth acquire failed: {}", e),
    }
    for session in held {
        pool.release(session).await?;
    }

    println!("\nWaiting for the reaper to close idle sessions...");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stats = pool.stats();
    println!("\n=== Pool Statistics ===");
    println!("Total: {} (min {}, max {})", stats.total, stats.min_size, stats.max_size);
    println!("Created: {}, destroyed: {}", stats.created, stats.destroyed);
    println!(
        "Acquires: {} ok, {} failed, {} timed out",
        stats.acquire_successes, stats.acquire_failures, stats.timeouts
    );
    println!(
        "Acquire latency: p50 {:?}, p99 {:?}",
        stats.latency.p50, stats.latency.p99
    );

    pool.close().await;
    println!("\n=== Example Complete ===");
    Ok(())
}
