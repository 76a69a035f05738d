//! End-to-end placement rounds against the in-memory authorities.
//!
//! Every test runs on a paused clock, so backoff sleeps and dequeue waits
//! advance instantly once the runtime is idle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use offerpack_core::{PlacementConstraint, ResourceVector, Task, TaskId};
use offerpack_engine::{
    EngineSettings, ErrorKind, MemoryHostManager, MemoryResourceManager, PlacementEngine,
    PlacementMetrics,
};

struct Cluster {
    rm: Arc<MemoryResourceManager>,
    hm: Arc<MemoryHostManager>,
    engine: PlacementEngine,
}

fn cluster(settings: EngineSettings) -> Cluster {
    let rm = Arc::new(MemoryResourceManager::new());
    let hm = Arc::new(MemoryHostManager::new());
    let engine = PlacementEngine::new(settings, rm.clone(), hm.clone(), Arc::new(PlacementMetrics::new()));
    Cluster { rm, hm, engine }
}

fn small(id: &str) -> Task {
    Task::new(id, ResourceVector::cpu_mem(1.0, 100.0))
}

fn large(id: &str) -> Task {
    Task::new(id, ResourceVector::cpu_mem(4.0, 1000.0))
}

fn east(id: &str) -> Task {
    small(id).with_constraint(PlacementConstraint::host_label("zone", "east"))
}

fn add_plain_hosts(hm: &MemoryHostManager, n: usize) {
    for i in 0..n {
        hm.add_host(&format!("host-{i}"), ResourceVector::cpu_mem(8.0, 8000.0));
    }
}

fn add_east_hosts(hm: &MemoryHostManager, n: usize) {
    for i in 0..n {
        hm.add_host_with_attributes(
            &format!("zone-east-{i}"),
            ResourceVector::cpu_mem(8.0, 8000.0),
            [("zone", "east")],
        );
    }
}

fn workload() -> Vec<Task> {
    let mut tasks = Vec::new();
    for i in 0..12 {
        tasks.push(small(&format!("small-{i}")));
    }
    for i in 0..4 {
        tasks.push(large(&format!("large-{i}")));
    }
    for i in 0..4 {
        tasks.push(east(&format!("east-{i}")));
    }
    tasks
}

/// Poll until `done` holds, advancing the paused clock in small steps.
async fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..1200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    done()
}

fn assert_no_offer_leak(c: &Cluster) {
    let stats = c.hm.stats();
    let placements = c.rm.placements();
    let consumed: HashSet<_> = placements.iter().map(|p| p.offer_id.clone()).collect();
    assert_eq!(consumed.len(), placements.len(), "offer used by two placements");
    assert_eq!(
        stats.acquired,
        consumed.len() as u64 + stats.released,
        "acquired offers neither consumed nor released: {stats:?}"
    );
    assert_eq!(c.hm.leased_count(), consumed.len());
}

#[tokio::test(start_paused = true)]
async fn places_every_task_exactly_once() {
    let c = cluster(EngineSettings::default());
    add_plain_hosts(&c.hm, 8);
    add_east_hosts(&c.hm, 2);

    let tasks = workload();
    let by_id: HashMap<TaskId, Task> = tasks.iter().map(|t| (t.id.clone(), t.clone())).collect();
    c.rm.enqueue(tasks);

    c.engine.start();
    assert!(wait_for(|| c.rm.placed_tasks() == 20).await, "not every task placed");
    c.engine.shutdown().await;

    for id in by_id.keys() {
        assert_eq!(c.rm.placed_count(id), 1, "{id} placed {} times", c.rm.placed_count(id));
    }
    assert_no_offer_leak(&c);

    for placement in c.rm.placements() {
        let used = placement
            .tasks
            .iter()
            .map(|id| by_id[id].resource)
            .fold(ResourceVector::ZERO, |acc, r| acc.add(&r));
        assert!(
            ResourceVector::cpu_mem(8.0, 8000.0).contains(&used),
            "{} overcommitted: {used}",
            placement.hostname
        );
        if placement.tasks.iter().any(|id| id.0.starts_with("east-")) {
            assert!(placement.hostname.starts_with("zone-east-"), "{}", placement.hostname);
        }
    }

    let snap = c.engine.metrics().snapshot();
    assert_eq!(snap.tasks_placed, 20);
    assert_eq!(snap.task_dequeue, 20);
    assert_eq!(snap.running, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_commits_are_retried_without_double_placement() {
    let c = cluster(EngineSettings::default());
    add_plain_hosts(&c.hm, 8);
    add_east_hosts(&c.hm, 2);
    c.rm.fail_next_set_placements(3, ErrorKind::Unavailable);
    c.rm.enqueue(workload());

    c.engine.start();
    assert!(wait_for(|| c.rm.placed_tasks() == 20).await);
    c.engine.shutdown().await;

    assert_eq!(c.rm.stats().set_placement_failures, 3);
    assert_eq!(c.engine.metrics().snapshot().set_placement_fail, 3);
    let total: usize = c.rm.placements().iter().map(|p| p.tasks.len()).sum();
    assert_eq!(total, 20);
    assert_no_offer_leak(&c);
}

#[tokio::test(start_paused = true)]
async fn short_capacity_abandons_at_deadline_without_leaking() {
    let c = cluster(EngineSettings {
        max_placement_duration: Duration::from_secs(5),
        ..EngineSettings::default()
    });
    // One host fits eight small tasks; twelve are queued.
    add_plain_hosts(&c.hm, 1);
    c.rm.enqueue((0..12).map(|i| small(&format!("small-{i}"))));

    c.engine.start();
    let metrics = c.engine.metrics().clone();
    assert!(wait_for(|| metrics.snapshot().groups_abandoned == 1).await);
    c.engine.shutdown().await;

    assert_eq!(c.rm.placed_tasks(), 8);
    let snap = metrics.snapshot();
    assert_eq!(snap.tasks_abandoned, 4);
    assert!(snap.offer_starved > 0);
    assert_no_offer_leak(&c);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_backoff() {
    let c = cluster(EngineSettings {
        backoff_interval: Duration::from_secs(20),
        ..EngineSettings::default()
    });
    c.rm.enqueue((0..3).map(|i| small(&format!("small-{i}"))));

    c.engine.start();
    let metrics = c.engine.metrics().clone();
    assert!(wait_for(|| metrics.snapshot().offer_starved >= 1).await);

    let stopping = tokio::time::Instant::now();
    c.engine.shutdown().await;
    assert!(stopping.elapsed() < Duration::from_secs(5));
    assert!(!c.engine.is_running());
    assert_eq!(c.rm.placed_tasks(), 0);
    assert_eq!(metrics.snapshot().tasks_abandoned, 3);
}

#[tokio::test(start_paused = true)]
async fn dequeue_failures_are_survived() {
    let c = cluster(EngineSettings::default());
    add_plain_hosts(&c.hm, 2);
    c.rm.fail_next_dequeue(2, ErrorKind::Unavailable);
    c.rm.enqueue((0..4).map(|i| small(&format!("small-{i}"))));

    c.engine.start();
    assert!(wait_for(|| c.rm.placed_tasks() == 4).await);
    c.engine.shutdown().await;

    assert_eq!(c.engine.metrics().snapshot().task_dequeue_fail, 2);
    assert_no_offer_leak(&c);
}

#[tokio::test(start_paused = true)]
async fn bounded_workers_still_drain_every_group() {
    let c = cluster(EngineSettings {
        max_concurrent_groups: 1,
        ..EngineSettings::default()
    });
    add_plain_hosts(&c.hm, 8);
    add_east_hosts(&c.hm, 2);
    c.rm.enqueue(workload());

    c.engine.start();
    assert!(wait_for(|| c.rm.placed_tasks() == 20).await);
    c.engine.shutdown().await;

    assert_eq!(c.engine.metrics().snapshot().groups_completed, 3);
    assert_no_offer_leak(&c);
}
