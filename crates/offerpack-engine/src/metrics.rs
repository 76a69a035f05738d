//! Placement engine counters.
//!
//! Lock-free atomics updated on the hot path, snapshotted for the
//! Prometheus text exposition served by the daemon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Running sum and count of a duration, in microseconds.
#[derive(Debug, Default)]
struct DurationStat {
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl DurationStat {
    fn record(&self, d: Duration) {
        self.sum_us.fetch_add(d.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct PlacementMetrics {
    running: AtomicU64,
    task_dequeue: AtomicU64,
    task_dequeue_fail: AtomicU64,
    offer_get: AtomicU64,
    offer_get_fail: AtomicU64,
    offer_starved: AtomicU64,
    offer_released: AtomicU64,
    offer_release_fail: AtomicU64,
    set_placement_success: AtomicU64,
    set_placement_fail: AtomicU64,
    tasks_placed: AtomicU64,
    groups_completed: AtomicU64,
    groups_abandoned: AtomicU64,
    tasks_abandoned: AtomicU64,
    tasks_unconfirmed: AtomicU64,
    set_placement_duration: DurationStat,
    create_placement_duration: DurationStat,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub running: u64,
    pub task_dequeue: u64,
    pub task_dequeue_fail: u64,
    pub offer_get: u64,
    pub offer_get_fail: u64,
    pub offer_starved: u64,
    pub offer_released: u64,
    pub offer_release_fail: u64,
    pub set_placement_success: u64,
    pub set_placement_fail: u64,
    pub tasks_placed: u64,
    pub groups_completed: u64,
    pub groups_abandoned: u64,
    pub tasks_abandoned: u64,
    pub tasks_unconfirmed: u64,
    pub set_placement_duration_us_sum: u64,
    pub set_placement_duration_count: u64,
    pub create_placement_duration_us_sum: u64,
    pub create_placement_duration_count: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl PlacementMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(u64::from(running), Ordering::Relaxed);
    }

    pub fn task_dequeued(&self, tasks: usize) {
        bump(&self.task_dequeue, tasks as u64);
    }

    pub fn task_dequeue_failed(&self) {
        bump(&self.task_dequeue_fail, 1);
    }

    pub fn offer_got(&self) {
        bump(&self.offer_get, 1);
    }

    pub fn offer_get_failed(&self) {
        bump(&self.offer_get_fail, 1);
    }

    pub fn offer_starved(&self) {
        bump(&self.offer_starved, 1);
    }

    pub fn offers_released(&self, n: usize) {
        bump(&self.offer_released, n as u64);
    }

    pub fn offer_release_failed(&self) {
        bump(&self.offer_release_fail, 1);
    }

    pub fn placements_set(&self, placements: usize, tasks: usize, took: Duration) {
        bump(&self.set_placement_success, placements as u64);
        bump(&self.tasks_placed, tasks as u64);
        self.set_placement_duration.record(took);
    }

    pub fn set_placement_failed(&self) {
        bump(&self.set_placement_fail, 1);
    }

    pub fn placement_created(&self, took: Duration) {
        self.create_placement_duration.record(took);
    }

    pub fn group_completed(&self) {
        bump(&self.groups_completed, 1);
    }

    pub fn group_abandoned(&self, remaining_tasks: usize) {
        bump(&self.groups_abandoned, 1);
        bump(&self.tasks_abandoned, remaining_tasks as u64);
    }

    /// Tasks in a commit whose outcome is unknown, left to the resource manager.
    pub fn tasks_unconfirmed(&self, tasks: usize) {
        bump(&self.tasks_unconfirmed, tasks as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            running: load(&self.running),
            task_dequeue: load(&self.task_dequeue),
            task_dequeue_fail: load(&self.task_dequeue_fail),
            offer_get: load(&self.offer_get),
            offer_get_fail: load(&self.offer_get_fail),
            offer_starved: load(&self.offer_starved),
            offer_released: load(&self.offer_released),
            offer_release_fail: load(&self.offer_release_fail),
            set_placement_success: load(&self.set_placement_success),
            set_placement_fail: load(&self.set_placement_fail),
            tasks_placed: load(&self.tasks_placed),
            groups_completed: load(&self.groups_completed),
            groups_abandoned: load(&self.groups_abandoned),
            tasks_abandoned: load(&self.tasks_abandoned),
            tasks_unconfirmed: load(&self.tasks_unconfirmed),
            set_placement_duration_us_sum: load(&self.set_placement_duration.sum_us),
            set_placement_duration_count: load(&self.set_placement_duration.count),
            create_placement_duration_us_sum: load(&self.create_placement_duration.sum_us),
            create_placement_duration_count: load(&self.create_placement_duration.count),
        }
    }
}

/// Render a snapshot in the Prometheus text exposition format.
pub fn render_prometheus(s: &MetricsSnapshot) -> String {
    let mut out = String::new();

    let mut metric = |name: &str, kind: &str, help: &str, value: u64| {
        out.push_str(&format!("# HELP offerpack_placement_{name} {help}\n"));
        out.push_str(&format!("# TYPE offerpack_placement_{name} {kind}\n"));
        out.push_str(&format!("offerpack_placement_{name} {value}\n"));
    };

    metric("running", "gauge", "Whether the placement engine is running.", s.running);
    metric("task_dequeue_total", "counter", "Tasks dequeued from the resource manager.", s.task_dequeue);
    metric("task_dequeue_fail_total", "counter", "Failed task dequeue calls.", s.task_dequeue_fail);
    metric("offer_get_total", "counter", "Acquisitions that returned offers.", s.offer_get);
    metric("offer_get_fail_total", "counter", "Failed offer acquisitions.", s.offer_get_fail);
    metric("offer_starved_total", "counter", "Acquisitions that returned no offers.", s.offer_starved);
    metric("offer_released_total", "counter", "Offers returned unused.", s.offer_released);
    metric("offer_release_fail_total", "counter", "Failed offer release calls.", s.offer_release_fail);
    metric("set_placement_success_total", "counter", "Placements committed.", s.set_placement_success);
    metric("set_placement_fail_total", "counter", "Failed placement commits.", s.set_placement_fail);
    metric("tasks_placed_total", "counter", "Tasks in committed placements.", s.tasks_placed);
    metric("groups_completed_total", "counter", "Task groups fully placed.", s.groups_completed);
    metric("groups_abandoned_total", "counter", "Task groups abandoned with tasks left.", s.groups_abandoned);
    metric("tasks_abandoned_total", "counter", "Tasks left unplaced by abandoned groups.", s.tasks_abandoned);
    metric(
        "tasks_unconfirmed_total",
        "counter",
        "Tasks in commits that timed out, left to the resource manager.",
        s.tasks_unconfirmed,
    );
    metric(
        "set_placement_duration_us_sum",
        "counter",
        "Total time spent committing placements, in microseconds.",
        s.set_placement_duration_us_sum,
    );
    metric(
        "set_placement_duration_count",
        "counter",
        "Number of timed placement commits.",
        s.set_placement_duration_count,
    );
    metric(
        "create_placement_duration_us_sum",
        "counter",
        "Total time spent packing tasks onto offers, in microseconds.",
        s.create_placement_duration_us_sum,
    );
    metric(
        "create_placement_duration_count",
        "counter",
        "Number of placements created.",
        s.create_placement_duration_count,
    );

    out
}
