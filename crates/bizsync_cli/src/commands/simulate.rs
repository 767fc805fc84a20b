//! Simulate command implementation.
//!
//! Runs the sync engine against in-memory backends with injected
//! failures and an optional offline window, then reports where every
//! operation ended up.

use bizsync_core::{OperationRequest, Resource};
use bizsync_engine::{
    EngineConfig, MemoryCache, MemoryMirror, MemoryRecordStore, NetworkMonitor, SyncEngine,
    SyncStatus,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Simulation parameters.
#[derive(Debug)]
pub struct SimulateOptions<'a> {
    /// Number of operations to enqueue.
    pub operations: usize,
    /// Fraction of record store calls that fail.
    pub failure_rate: f64,
    /// How long the network stays offline at the start.
    pub offline_for: Duration,
    /// Engine configuration file (JSON).
    pub config: Option<&'a Path>,
    /// Give up waiting for the queue after this long.
    pub timeout: Duration,
    /// Output format (text, json).
    pub format: &'a str,
}

/// Runs the simulate command.
pub fn run(options: SimulateOptions<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match options.config {
        Some(path) => EngineConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(simulate(config, &options))
}

async fn simulate(
    config: EngineConfig,
    options: &SimulateOptions<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryRecordStore::new());
    store.set_failure_rate(options.failure_rate);
    let mirror = Arc::new(MemoryMirror::new());
    let cache = Arc::new(MemoryCache::new());
    let network = Arc::new(NetworkMonitor::new(options.offline_for.is_zero()));

    let engine = SyncEngine::builder()
        .config(config)
        .record_store(store.clone())
        .mirror(mirror.clone())
        .local_cache(cache.clone())
        .network(Arc::clone(&network))
        .build()?;

    tracing::info!(
        operations = options.operations,
        failure_rate = options.failure_rate,
        offline_ms = options.offline_for.as_millis() as u64,
        "starting simulation"
    );

    for index in 0..options.operations {
        engine.enqueue(request(index));
    }

    if !options.offline_for.is_zero() {
        tokio::time::sleep(options.offline_for).await;
        network.set_online(true);
    }

    let settled = wait_until_idle(&engine, options.timeout).await;
    if !settled {
        tracing::warn!(
            timeout_ms = options.timeout.as_millis() as u64,
            "queue did not settle before the timeout"
        );
    }

    let status = engine.status();
    let health = engine.health_check();
    engine.shutdown();

    let plans = store.records(Resource::BusinessPlan.table()).len();
    let profiles = store.records(Resource::UserProfile.table()).len();

    if options.format == "json" {
        let report = json!({
            "status": status,
            "health": health,
            "records": { "business_plans": plans, "user_profiles": profiles },
            "mirrored": mirror.published().len(),
            "cached": cache.len(),
            "store_calls": store.calls().len(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&status);
        println!();
        println!("Records:");
        println!("  business_plans: {plans}");
        println!("  user_profiles:  {profiles}");
        println!("  mirrored:       {}", mirror.published().len());
        println!("  cached:         {}", cache.len());
        println!("  store calls:    {}", store.calls().len());
        println!();
        if health.healthy {
            println!("✓ All data sources healthy");
        } else {
            for issue in &health.issues {
                println!("✗ {issue}");
            }
        }
    }

    if settled {
        Ok(())
    } else {
        Err("Simulation timed out".into())
    }
}

/// Operation number `index`: a plan, then a profile, then a section of
/// that plan, repeating. Every fourth plan is missing its timestamps and
/// is repaired on dispatch.
fn request(index: usize) -> OperationRequest {
    let round = index / 3;
    let plan_id = format!("plan-{round}");
    match index % 3 {
        0 => {
            let mut plan = json!({
                "id": plan_id,
                "title": format!("Simulated plan {round}"),
                "sections": {},
            });
            if round % 4 != 0 {
                let now = "2024-01-01T00:00:00Z";
                plan["created_at"] = Value::from(now);
                plan["updated_at"] = Value::from(now);
            }
            OperationRequest::create(Resource::BusinessPlan, plan)
        }
        1 => OperationRequest::create(
            Resource::UserProfile,
            json!({
                "id": format!("user-{round}"),
                "email": format!("user{round}@example.com"),
                "role": "founder",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z",
            }),
        ),
        _ => OperationRequest::update(
            Resource::Section,
            json!({
                "plan_id": plan_id,
                "section_key": "executive_summary",
                "content": format!("Summary for round {round}"),
            }),
        ),
    }
}

async fn wait_until_idle(engine: &SyncEngine, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut updates = engine.status_receiver();

    loop {
        let status = engine.status();
        if status.is_online && status.is_idle() {
            return true;
        }
        match tokio::time::timeout_at(deadline, updates.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => return false,
        }
    }
}

fn print_status(status: &SyncStatus) {
    println!("Sync status:");
    println!("  online:            {}", status.is_online);
    println!("  pending:           {}", status.pending_operations);
    println!("  scheduled retries: {}", status.scheduled_retries);
    println!("  failed:            {}", status.failed_operations);
    match status.last_sync_time {
        Some(at) => println!("  last sync:         {}", at.to_rfc3339()),
        None => println!("  last sync:         never"),
    }
    for message in status.error_messages() {
        println!("  error: {message}");
    }
}
