//! `simulate` mode: the engine against in-memory authorities.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use offerpack_core::{MAX_DURATION, PlacementConstraint, ResourceVector, Task};
use offerpack_engine::{
    EngineSettings, MemoryHostManager, MemoryResourceManager, MetricsSnapshot, PlacementEngine,
    PlacementMetrics,
};

#[derive(Debug, Clone)]
pub struct SimulationSpec {
    pub tasks: usize,
    pub hosts: usize,
    pub host_cpu: f64,
    pub host_mem_mb: f64,
    /// Give up waiting for placements after this long.
    pub timeout: Duration,
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            tasks: 100,
            hosts: 20,
            host_cpu: 16.0,
            host_mem_mb: 65536.0,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub tasks: usize,
    pub placed: usize,
    pub placements: usize,
    pub offers_acquired: u64,
    pub offers_released: u64,
    /// Acquired offers neither placed on nor released. Always zero unless a release failed.
    pub offers_leaked: u64,
    pub elapsed_ms: u64,
    pub metrics: MetricsSnapshot,
}

/// Three task shapes in rotation: small, large, and small pinned to zone `a`.
fn workload(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| match i % 3 {
            0 => Task::new(format!("small-{i}"), ResourceVector::cpu_mem(1.0, 1024.0)).with_job("web"),
            1 => Task::new(format!("large-{i}"), ResourceVector::cpu_mem(4.0, 8192.0)).with_job("batch"),
            _ => Task::new(format!("zoned-{i}"), ResourceVector::cpu_mem(1.0, 1024.0))
                .with_job("cache")
                .with_constraint(PlacementConstraint::host_label("zone", "a")),
        })
        .collect()
}

pub async fn run_simulation(spec: &SimulationSpec, settings: EngineSettings) -> anyhow::Result<SimulationReport> {
    anyhow::ensure!(spec.hosts > 0, "simulation needs at least one host");
    anyhow::ensure!(
        spec.timeout <= MAX_DURATION,
        "simulation timeout {:?} exceeds {MAX_DURATION:?}",
        spec.timeout
    );

    let rm = Arc::new(MemoryResourceManager::new());
    let hm = Arc::new(MemoryHostManager::new());
    let capacity = ResourceVector::cpu_mem(spec.host_cpu, spec.host_mem_mb);
    for i in 0..spec.hosts {
        let zone = if i % 2 == 0 { "a" } else { "b" };
        hm.add_host_with_attributes(&format!("host-{i:04}"), capacity, [("zone", zone)]);
    }
    rm.enqueue(workload(spec.tasks));

    let engine = PlacementEngine::new(settings, rm.clone(), hm.clone(), Arc::new(PlacementMetrics::new()));
    info!(tasks = spec.tasks, hosts = spec.hosts, "simulation starting");

    let started = tokio::time::Instant::now();
    let deadline = started + spec.timeout;
    engine.start();
    while rm.placed_tasks() < spec.tasks && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    engine.shutdown().await;

    let placements = rm.placements().len();
    let stats = hm.stats();
    let report = SimulationReport {
        tasks: spec.tasks,
        placed: rm.placed_tasks(),
        placements,
        offers_acquired: stats.acquired,
        offers_released: stats.released,
        offers_leaked: stats.acquired.saturating_sub(placements as u64 + stats.released),
        elapsed_ms: started.elapsed().as_millis() as u64,
        metrics: engine.metrics().snapshot(),
    };
    info!(
        placed = report.placed,
        placements = report.placements,
        leaked = report.offers_leaked,
        "simulation finished"
    );
    Ok(report)
}
