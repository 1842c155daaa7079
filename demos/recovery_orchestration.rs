//! Recovery orchestration example.
//!
//! This example shows how to:
//! - Register health checks for a pool and a circuit
//! - Define recovery strategies with triggers, actions and cooldowns
//! - Let the orchestrator react to health and circuit events
//! - Inspect issues and execution records
//!
//! Run with: cargo run --example recovery_orchestration

use bulwark::mock::MockFactory;
use bulwark::prelude::*;
use bulwark::recovery::RecoveryEvent;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; audit events go to the `bulwark::audit` target
    tracing_subscriber::fmt()
        .with_env_filter("info,bulwark=debug")
        .init();

    println!("=== Bulwark Recovery Orchestration Example ===\n");

    let pool = ResourcePool::new(
        MockFactory::new(),
        PoolConfig::new().with_name("db").with_size(1, 2),
    )
    .await?;
    let breaker = Arc::new(CircuitBreaker::new(
        CircuitBreakerConfig::new().with_name("payments"),
    ));

    // Health checks
    let registry = HealthCheckRegistry::new();
    registry.register(
        "db-pool",
        PoolProbe::new(pool.clone()).with_utilization_threshold(1.0),
        HealthCheckConfig::new()
            .with_interval(Duration::from_millis(200))
            .with_criticality(Severity::High),
    )?;
    registry.register(
        "payments-circuit",
        CircuitProbe::new(Arc::clone(&breaker)),
        HealthCheckConfig::new().with_interval(Duration::from_millis(200)),
    )?;

    // Recovery
    let orchestrator = RecoveryOrchestrator::new(OrchestratorConfig::new());
    orchestrator.register_handler(ActionKind::ClearCache, PoolHandler::new(pool.clone()));
    orchestrator.register_handler(ActionKind::ScaleResources, PoolHandler::new(pool.clone()));
    orchestrator.register_handler(
        ActionKind::Failover,
        handler_fn(|request| async move {
            println!("  [failover] switching traffic away from {}", request.issue.source);
            Ok::<(), BoxError>(())
        }),
    );

    orchestrator.add_strategy(
        RecoveryStrategy::new("grow-db-pool")
            .with_name("Grow the database pool")
            .with_trigger(Trigger::source("db-pool"))
            .with_action(
                RecoveryAction::new(ActionKind::ScaleResources)
                    .with_config("max_size", 4)
                    .critical(),
            )
            .with_action(RecoveryAction::new(ActionKind::ClearCache))
            .with_cooldown(Duration::from_secs(30))
            .with_priority(10),
    )?;
    orchestrator.add_strategy(
        RecoveryStrategy::new("payments-failover")
            .with_trigger(Trigger::source_prefix("circuit:"))
            .with_action(
                RecoveryAction::new(ActionKind::Failover).with_timeout(Duration::from_secs(5)),
            )
            .with_cooldown(Duration::from_secs(60)),
    )?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let RecoveryEvent::ExecutionCompleted { execution } = &event {
                println!(
                    "  >> strategy '{}' finished: {}",
                    execution.strategy_id,
                    execution.outcome.as_str()
                );
            }
        }
    });

    orchestrator.watch_health(&registry);
    orchestrator.watch_circuit(&breaker);
    orchestrator.start()?;
    registry.start();

    // Exhaust the pool so its health check degrades
    println!("Holding every pooled resource...");
    let a = pool.acquire().await?;
    let b = pool.acquire().await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("Pool now allows {} resources", pool.stats().max_size);
    pool.release(a).await?;
    pool.release(b).await?;

    // Trip the circuit
    println!("\nTripping the payments circuit...");
    breaker.force_open();
    tokio::time::sleep(Duration::from_millis(300)).await;
    breaker.force_close();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let report = registry.report();
    println!("\n=== Health Report ===");
    println!("{}", serde_json::to_string_pretty(&report)?);

    println!("\n=== Issues ===");
    for issue in orchestrator.issues() {
        println!(
            "{} [{}] {} - {}",
            issue.source, issue.severity, issue.status, issue.description
        );
    }

    println!("\n=== Executions ===");
    for execution in orchestrator.executions() {
        println!("{}", serde_json::to_string(&execution)?);
    }

    registry.stop().await;
    orchestrator.shutdown().await;
    pool.close().await;

    println!("\n=== Example Complete ===");
    Ok(())
}
