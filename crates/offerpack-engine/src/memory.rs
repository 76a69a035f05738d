//! In-memory resource and host managers.
//!
//! Used by the daemon's `simulate` mode and by tests. Both record every
//! call so tests can check offer and task accounting, and both support
//! failure injection and artificial latency.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use offerpack_core::{
    Constraint, HostOffer, LabelCondition, LabelKind, OfferId, Placement, PlacementConstraint,
    ResourceVector, Task, TaskId,
};

use crate::authority::{HostManager, ResourceManager, procedures};
use crate::error::{AuthorityError, AuthorityResult, ErrorKind};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fails the next `remaining` calls with `kind`.
#[derive(Debug, Default)]
struct Injection {
    remaining: usize,
    kind: Option<ErrorKind>,
}

impl Injection {
    fn arm(&mut self, times: usize, kind: ErrorKind) {
        self.remaining = times;
        self.kind = Some(kind);
    }

    fn fire(&mut self) -> Option<ErrorKind> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.kind
    }
}

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

// ── Resource manager ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceManagerStats {
    pub dequeue_calls: u64,
    pub set_placement_calls: u64,
    pub set_placement_failures: u64,
}

#[derive(Default)]
struct RmState {
    pending: VecDeque<Task>,
    placements: Vec<Placement>,
    placed: HashMap<TaskId, usize>,
    fail_dequeue: Injection,
    fail_set: Injection,
    panic_dequeue: bool,
    latency: Duration,
    stats: ResourceManagerStats,
}

/// Pending-task queue and placement ledger held in memory.
#[derive(Default)]
pub struct MemoryResourceManager {
    state: Mutex<RmState>,
    enqueued: Notify,
}

impl MemoryResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append tasks to the pending queue.
    pub fn enqueue(&self, tasks: impl IntoIterator<Item = Task>) {
        lock(&self.state).pending.extend(tasks);
        self.enqueued.notify_waiters();
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Every committed placement, in commit order.
    pub fn placements(&self) -> Vec<Placement> {
        lock(&self.state).placements.clone()
    }

    /// How many committed placements name `task`.
    pub fn placed_count(&self, task: &TaskId) -> usize {
        lock(&self.state).placed.get(task).copied().unwrap_or(0)
    }

    /// Distinct tasks named by committed placements.
    pub fn placed_tasks(&self) -> usize {
        lock(&self.state).placed.len()
    }

    pub fn stats(&self) -> ResourceManagerStats {
        lock(&self.state).stats
    }

    pub fn fail_next_dequeue(&self, times: usize, kind: ErrorKind) {
        lock(&self.state).fail_dequeue.arm(times, kind);
    }

    pub fn fail_next_set_placements(&self, times: usize, kind: ErrorKind) {
        lock(&self.state).fail_set.arm(times, kind);
    }

    /// Make the next dequeue call panic.
    pub fn panic_next_dequeue(&self) {
        lock(&self.state).panic_dequeue = true;
    }

    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    fn latency(&self) -> Duration {
        lock(&self.state).latency
    }
}

#[async_trait]
impl ResourceManager for MemoryResourceManager {
    async fn dequeue_tasks(&self, limit: u32, timeout: Duration) -> AuthorityResult<Vec<Task>> {
        simulate_latency(self.latency()).await;

        let should_panic = {
            let mut state = lock(&self.state);
            state.stats.dequeue_calls += 1;
            if let Some(kind) = state.fail_dequeue.fire() {
                return Err(AuthorityError::new(kind, procedures::DEQUEUE_TASKS, "injected failure"));
            }
            std::mem::take(&mut state.panic_dequeue)
        };
        if should_panic {
            panic!("resource manager inbound not ready");
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let enqueued = self.enqueued.notified();
            {
                let mut state = lock(&self.state);
                if !state.pending.is_empty() {
                    let n = (limit as usize).min(state.pending.len());
                    return Ok(state.pending.drain(..n).collect());
                }
            }
            if tokio::time::timeout_at(deadline, enqueued).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn set_placements(&self, placements: &[Placement]) -> AuthorityResult<()> {
        simulate_latency(self.latency()).await;

        let mut state = lock(&self.state);
        state.stats.set_placement_calls += 1;
        if let Some(kind) = state.fail_set.fire() {
            state.stats.set_placement_failures += 1;
            return Err(AuthorityError::new(
                kind,
                procedures::SET_PLACEMENTS,
                "no placements accepted",
            ));
        }

        for p in placements {
            for task in &p.tasks {
                *state.placed.entry(task.clone()).or_insert(0) += 1;
            }
        }
        state.placements.extend_from_slice(placements);
        Ok(())
    }
}

// ── Host manager ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostManagerStats {
    pub acquire_calls: u64,
    /// Offers handed out.
    pub acquired: u64,
    pub release_calls: u64,
    /// Offers taken back.
    pub released: u64,
}

struct Host {
    agent_id: String,
    resources: ResourceVector,
    attributes: BTreeMap<String, String>,
    lease: Option<OfferId>,
}

#[derive(Default)]
struct HmState {
    hosts: BTreeMap<String, Host>,
    leases: HashMap<OfferId, String>,
    next_offer: u64,
    last_constraint: Option<Constraint>,
    fail_acquire: Injection,
    fail_release: Injection,
    starve: usize,
    latency: Duration,
    stats: HostManagerStats,
}

/// Host inventory with one offer lease per host.
///
/// An offer that is never released stays leased, which is how a consumed
/// offer looks from here.
#[derive(Default)]
pub struct MemoryHostManager {
    state: Mutex<HmState>,
}

impl MemoryHostManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, hostname: &str, resources: ResourceVector) {
        self.add_host_with_attributes(hostname, resources, std::iter::empty::<(String, String)>());
    }

    pub fn add_host_with_attributes<K, V>(
        &self,
        hostname: &str,
        resources: ResourceVector,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        let host = Host {
            agent_id: format!("agent-{hostname}"),
            resources,
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            lease: None,
        };
        lock(&self.state).hosts.insert(hostname.to_string(), host);
    }

    /// Offers currently leased and not released.
    pub fn leased_count(&self) -> usize {
        lock(&self.state).leases.len()
    }

    /// The last constraint passed to `acquire_host_offers`.
    pub fn last_constraint(&self) -> Option<Constraint> {
        lock(&self.state).last_constraint.clone()
    }

    pub fn stats(&self) -> HostManagerStats {
        lock(&self.state).stats
    }

    pub fn fail_next_acquire(&self, times: usize, kind: ErrorKind) {
        lock(&self.state).fail_acquire.arm(times, kind);
    }

    pub fn fail_next_release(&self, times: usize, kind: ErrorKind) {
        lock(&self.state).fail_release.arm(times, kind);
    }

    /// Return no offers for the next `times` acquisitions.
    pub fn starve_next_acquire(&self, times: usize) {
        lock(&self.state).starve = times;
    }

    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    fn latency(&self) -> Duration {
        lock(&self.state).latency
    }
}

#[async_trait]
impl HostManager for MemoryHostManager {
    async fn acquire_host_offers(&self, constraint: &Constraint) -> AuthorityResult<Vec<HostOffer>> {
        simulate_latency(self.latency()).await;

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.stats.acquire_calls += 1;
        state.last_constraint = Some(constraint.clone());

        if let Some(kind) = state.fail_acquire.fire() {
            return Err(AuthorityError::new(
                kind,
                procedures::ACQUIRE_HOST_OFFERS,
                "injected failure",
            ));
        }
        if state.starve > 0 {
            state.starve -= 1;
            return Ok(Vec::new());
        }

        let mut offers = Vec::new();
        for (hostname, host) in state.hosts.iter_mut() {
            if offers.len() >= constraint.host_limit as usize {
                break;
            }
            if host.lease.is_some()
                || !host.resources.contains(&constraint.resource_minimum)
                || !host_matches(&host.attributes, constraint.scheduling.as_ref())
            {
                continue;
            }

            state.next_offer += 1;
            let id = OfferId(format!("offer-{}", state.next_offer));
            host.lease = Some(id.clone());
            state.leases.insert(id.clone(), hostname.clone());
            offers.push(HostOffer {
                id,
                hostname: hostname.clone(),
                agent_id: host.agent_id.clone(),
                resources: host.resources,
                attributes: host.attributes.clone(),
            });
        }

        state.stats.acquired += offers.len() as u64;
        debug!(offers = offers.len(), "leased host offers");
        Ok(offers)
    }

    async fn release_host_offers(&self, offers: &[HostOffer]) -> AuthorityResult<()> {
        simulate_latency(self.latency()).await;

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.stats.release_calls += 1;

        if let Some(kind) = state.fail_release.fire() {
            return Err(AuthorityError::new(
                kind,
                procedures::RELEASE_HOST_OFFERS,
                "injected failure",
            ));
        }
        if let Some(unknown) = offers.iter().find(|o| !state.leases.contains_key(&o.id)) {
            return Err(AuthorityError::invalid_argument(
                procedures::RELEASE_HOST_OFFERS,
                format!("unknown offer {}", unknown.id),
            ));
        }

        for offer in offers {
            if let Some(hostname) = state.leases.remove(&offer.id) {
                if let Some(host) = state.hosts.get_mut(&hostname) {
                    host.lease = None;
                }
            }
        }
        state.stats.released += offers.len() as u64;
        Ok(())
    }
}

/// Evaluate a placement expression against host attributes.
///
/// Task-label terms need the set of tasks already on the host, which is
/// not tracked here, so they always pass.
fn host_matches(attributes: &BTreeMap<String, String>, constraint: Option<&PlacementConstraint>) -> bool {
    match constraint {
        None => true,
        Some(PlacementConstraint::Label(l)) => {
            if l.kind == LabelKind::Task {
                return true;
            }
            let count = u32::from(attributes.get(&l.key) == Some(&l.value));
            match l.condition {
                LabelCondition::LessThan => count < l.requirement,
                LabelCondition::Equal => count == l.requirement,
                LabelCondition::GreaterThan => count > l.requirement,
            }
        }
        Some(PlacementConstraint::And { constraints }) => {
            constraints.iter().all(|c| host_matches(attributes, Some(c)))
        }
        Some(PlacementConstraint::Or { constraints }) => {
            constraints.iter().any(|c| host_matches(attributes, Some(c)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraint(limit: u32) -> Constraint {
        Constraint::new(ResourceVector::cpu_mem(1.0, 100.0), None).with_host_limit(limit)
    }

    #[tokio::test]
    async fn host_is_leased_once_until_released() {
        let hm = MemoryHostManager::new();
        hm.add_host("h1", ResourceVector::cpu_mem(2.0, 200.0));

        let first = hm.acquire_host_offers(&constraint(5)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(hm.acquire_host_offers(&constraint(5)).await.unwrap().is_empty());

        hm.release_host_offers(&first).await.unwrap();
        let again = hm.acquire_host_offers(&constraint(5)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_ne!(again[0].id, first[0].id);
    }

    #[tokio::test]
    async fn respects_host_limit_and_minimum() {
        let hm = MemoryHostManager::new();
        hm.add_host("big-1", ResourceVector::cpu_mem(8.0, 8000.0));
        hm.add_host("big-2", ResourceVector::cpu_mem(8.0, 8000.0));
        hm.add_host("tiny", ResourceVector::cpu_mem(0.5, 50.0));

        let offers = hm.acquire_host_offers(&constraint(1)).await.unwrap();
        assert_eq!(offers.len(), 1);
        let offers = hm.acquire_host_offers(&constraint(10)).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].hostname, "big-2");
    }

    #[tokio::test]
    async fn filters_on_host_labels() {
        let hm = MemoryHostManager::new();
        hm.add_host_with_attributes("east", ResourceVector::cpu_mem(4.0, 400.0), [("zone", "east")]);
        hm.add_host_with_attributes("west", ResourceVector::cpu_mem(4.0, 400.0), [("zone", "west")]);

        let c = Constraint::new(
            ResourceVector::cpu_mem(1.0, 100.0),
            Some(PlacementConstraint::host_label("zone", "west")),
        )
        .with_host_limit(5);
        let offers = hm.acquire_host_offers(&c).await.unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].hostname, "west");
    }

    #[tokio::test]
    async fn releasing_unknown_offer_is_rejected() {
        let hm = MemoryHostManager::new();
        let bogus = HostOffer::new("nope", "h", ResourceVector::ZERO);
        let err = hm.release_host_offers(&[bogus]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn ledger_counts_each_task() {
        let rm = MemoryResourceManager::new();
        let offer = HostOffer::new("o1", "h1", ResourceVector::cpu_mem(4.0, 400.0));
        let p = Placement::for_offer(&offer, vec!["a".into(), "b".into()]);

        rm.set_placements(&[p]).await.unwrap();
        assert_eq!(rm.placed_count(&TaskId::from("a")), 1);
        assert_eq!(rm.placed_tasks(), 2);
        assert_eq!(rm.stats().set_placement_calls, 1);
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let rm = std::sync::Arc::new(MemoryResourceManager::new());
        let waiter = {
            let rm = rm.clone();
            tokio::spawn(async move { rm.dequeue_tasks(10, Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        rm.enqueue([Task::new("late", ResourceVector::cpu_mem(1.0, 1.0))]);

        let tasks = waiter.await.unwrap().unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn label_conditions() {
        let attrs: BTreeMap<String, String> = [("zone".to_string(), "a".to_string())].into();
        let present = PlacementConstraint::host_label("zone", "a");
        let absent = PlacementConstraint::host_label("zone", "b");
        assert!(host_matches(&attrs, Some(&present)));
        assert!(!host_matches(&attrs, Some(&absent)));
        assert!(host_matches(
            &attrs,
            Some(&PlacementConstraint::Or {
                constraints: vec![absent.clone(), present.clone()]
            })
        ));
        assert!(!host_matches(
            &attrs,
            Some(&PlacementConstraint::And {
                constraints: vec![absent, present]
            })
        ));
    }
}
