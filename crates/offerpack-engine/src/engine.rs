//! Placement round driver.
//!
//! One background loop dequeues tasks, groups them by constraint and
//! spawns a worker per group without waiting for it to finish. A worker
//! holds one of `max_concurrent_groups` permits, taken by the loop before
//! spawning, so a full pool holds back the next dequeue. Each worker runs
//! acquire → pack → commit → release until its group is empty, its
//! deadline passes, or the engine stops.
//!
//! ```text
//! PlacementEngine
//!   ├── round loop (one task)
//!   │   ├── TaskDequeuer::dequeue()
//!   │   └── group_tasks() → take permit → spawn worker per TaskGroup
//!   └── group workers (bounded by a semaphore)
//!       ├── OfferClient::acquire()
//!       ├── pack() per offer
//!       ├── PlacementCommitter::commit()
//!       └── OfferClient::release() for every offer not consumed
//! ```
//!
//! A commit that times out may still have been recorded. Its tasks are
//! left to the resource manager and its offers stay leased.
//!
//! Lifecycle flags are atomics; shutdown is also broadcast on a `watch`
//! channel so backoff sleeps wake early. In-flight remote calls always
//! complete before a worker exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, info, warn};

use offerpack_core::{ConfigError, HostOffer, OfferId, PlacementConfig};

use crate::authority::{HostManager, ResourceManager};
use crate::committer::PlacementCommitter;
use crate::dequeue::TaskDequeuer;
use crate::error::RetryPolicy;
use crate::grouper::{TaskGroup, group_tasks};
use crate::metrics::PlacementMetrics;
use crate::offers::OfferClient;
use crate::packer::{Packing, pack};

/// Resolved engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub task_dequeue_limit: u32,
    pub task_dequeue_timeout: Duration,
    pub max_placement_duration: Duration,
    pub offer_dequeue_limit: u32,
    pub rpc_timeout: Duration,
    pub backoff_interval: Duration,
    pub max_concurrent_groups: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            task_dequeue_limit: 100,
            task_dequeue_timeout: Duration::from_secs(1),
            max_placement_duration: Duration::from_secs(30),
            offer_dequeue_limit: 10,
            rpc_timeout: Duration::from_secs(10),
            backoff_interval: Duration::from_secs(1),
            max_concurrent_groups: 64,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &PlacementConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            task_dequeue_limit: config.task_dequeue_limit,
            task_dequeue_timeout: config.task_dequeue_timeout()?,
            max_placement_duration: config.max_placement_duration()?,
            offer_dequeue_limit: config.offer_dequeue_limit,
            rpc_timeout: config.rpc_timeout()?,
            backoff_interval: config.backoff_interval()?,
            max_concurrent_groups: config.max_concurrent_groups,
        })
    }
}

/// How a group worker finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// No task is left in the group. Tasks from a commit that timed out
    /// are not counted in `placed`.
    Placed { placed: usize },
    /// The deadline passed with tasks left; they go back with the next dequeue.
    DeadlineExpired { placed: usize, remaining: usize },
    /// The engine was stopped.
    Stopped { placed: usize, remaining: usize },
    /// A non-retryable error ended the group.
    Abandoned {
        placed: usize,
        remaining: usize,
        reason: String,
    },
}

impl GroupOutcome {
    pub fn placed(&self) -> usize {
        match self {
            GroupOutcome::Placed { placed }
            | GroupOutcome::DeadlineExpired { placed, .. }
            | GroupOutcome::Stopped { placed, .. }
            | GroupOutcome::Abandoned { placed, .. } => *placed,
        }
    }

    pub fn remaining(&self) -> usize {
        match self {
            GroupOutcome::Placed { .. } => 0,
            GroupOutcome::DeadlineExpired { remaining, .. }
            | GroupOutcome::Stopped { remaining, .. }
            | GroupOutcome::Abandoned { remaining, .. } => *remaining,
        }
    }
}

/// Result of one acquire → pack → commit cycle.
enum Cycle {
    /// Loop back to acquisition right away.
    Continue,
    /// Sleep the backoff interval, then loop back.
    Backoff,
    /// Stop working on this group.
    Abandon(String),
}

impl Cycle {
    fn from_policy(policy: RetryPolicy, reason: impl FnOnce() -> String) -> Self {
        match policy {
            RetryPolicy::Immediate => Cycle::Continue,
            RetryPolicy::Backoff => Cycle::Backoff,
            RetryPolicy::Abandon => Cycle::Abandon(reason()),
        }
    }
}

struct EngineInner {
    settings: EngineSettings,
    dequeuer: TaskDequeuer,
    offers: OfferClient,
    committer: PlacementCommitter,
    metrics: Arc<PlacementMetrics>,
    started: AtomicBool,
    shutdown: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Arc<Semaphore>,
}

/// The placement engine. Cheap to share behind an `Arc`.
pub struct PlacementEngine {
    inner: Arc<EngineInner>,
    round_loop: Mutex<Option<JoinHandle<()>>>,
}

impl PlacementEngine {
    pub fn new(
        settings: EngineSettings,
        resource_manager: Arc<dyn ResourceManager>,
        host_manager: Arc<dyn HostManager>,
        metrics: Arc<PlacementMetrics>,
    ) -> Self {
        let dequeuer = TaskDequeuer::new(
            resource_manager.clone(),
            settings.task_dequeue_limit,
            settings.task_dequeue_timeout,
            settings.rpc_timeout,
            metrics.clone(),
        );
        let offers = OfferClient::new(
            host_manager,
            settings.offer_dequeue_limit,
            settings.rpc_timeout,
            metrics.clone(),
        );
        let committer = PlacementCommitter::new(resource_manager, settings.rpc_timeout, metrics.clone());
        let (shutdown_tx, _) = watch::channel(false);
        let workers = Arc::new(Semaphore::new(settings.max_concurrent_groups.max(1)));

        Self {
            inner: Arc::new(EngineInner {
                settings,
                dequeuer,
                offers,
                committer,
                metrics,
                started: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                shutdown_tx,
                workers,
            }),
            round_loop: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &Arc<PlacementMetrics> {
        &self.inner.metrics
    }

    /// Start the round loop. Must be called within a tokio runtime.
    ///
    /// Idempotent: only the first call spawns the loop.
    pub fn start(&self) {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("placement engine already started");
            return;
        }

        info!("placement engine starting");
        self.inner.metrics.set_running(true);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            while inner.is_running() {
                inner.place_round().await;
            }
            debug!("placement round loop exited");
        });
        *self.round_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("placement engine started");
    }

    /// Request shutdown. Workers notice at their next loop-back point.
    ///
    /// Calling this before [`start`](Self::start) does nothing, so the
    /// engine can still be started afterwards.
    pub fn stop(&self) {
        if !self.inner.started.load(Ordering::Acquire) {
            debug!("placement engine not started, stop is a no-op");
            return;
        }
        info!("placement engine stopping");
        self.inner.metrics.set_running(false);
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.shutdown_tx.send_replace(true);
    }

    /// Stop, then wait for the round loop and every in-flight worker.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self
            .round_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let all = self.inner.settings.max_concurrent_groups.max(1) as u32;
        if let Ok(permits) = self.inner.workers.acquire_many(all).await {
            drop(permits);
        }
        info!("placement engine stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Run one dequeue → group → dispatch round. Returns the number of
    /// groups dispatched.
    pub async fn place_round(&self) -> usize {
        self.inner.place_round().await
    }

    /// Place one group in the current task, returning how it finished.
    pub async fn place_task_group(&self, group: TaskGroup) -> GroupOutcome {
        self.inner.place_task_group(group).await
    }
}

impl EngineInner {
    fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.shutdown.load(Ordering::Acquire)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sleep the backoff interval, capped at `deadline`, waking early on shutdown.
    async fn backoff(&self, deadline: Option<TokioInstant>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return;
        }
        let mut wake = instant_after(self.settings.backoff_interval);
        if let Some(deadline) = deadline {
            wake = wake.min(deadline);
        }
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = shutdown.changed() => {}
        }
    }

    async fn place_round(self: &Arc<Self>) -> usize {
        let tasks = match self.dequeuer.dequeue().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "failed to dequeue tasks, backing off");
                self.backoff(None).await;
                return 0;
            }
        };
        if tasks.is_empty() {
            debug!("no task to place in round");
            self.backoff(None).await;
            return 0;
        }

        info!(tasks = tasks.len(), "dequeued from task queue");
        let groups = group_tasks(tasks);
        let total = groups.len();
        let mut dispatched = 0;

        for (signature, group) in groups {
            let Some(permit) = self.worker_permit().await else {
                info!(
                    undispatched = total - dispatched,
                    "engine stopping, remaining groups left to the resource manager"
                );
                break;
            };
            let inner = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = inner.place_task_group(group).await;
                debug!(group = %signature, ?outcome, "group worker finished");
            });
            dispatched += 1;
        }
        dispatched
    }

    /// Wait for a free worker slot, or `None` once shutdown is requested.
    async fn worker_permit(&self) -> Option<OwnedSemaphorePermit> {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            return None;
        }
        if self.workers.available_permits() == 0 {
            debug!("all group workers busy, waiting for a free slot");
        }
        tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            permit = self.workers.clone().acquire_owned() => permit.ok(),
        }
    }

    async fn place_task_group(&self, mut group: TaskGroup) -> GroupOutcome {
        let total = group.len();
        let deadline = instant_after(self.settings.max_placement_duration);
        let mut placed = 0;
        debug!(group = %group.signature(), tasks = total, "placing task group");

        let outcome = loop {
            if group.is_empty() {
                debug!(group = %group.signature(), "all tasks placed");
                break GroupOutcome::Placed { placed };
            }
            if self.is_shutting_down() {
                break GroupOutcome::Stopped {
                    placed,
                    remaining: group.len(),
                };
            }
            if TokioInstant::now() >= deadline {
                break GroupOutcome::DeadlineExpired {
                    placed,
                    remaining: group.len(),
                };
            }

            match self.place_cycle(&mut group, &mut placed).await {
                Cycle::Continue => {}
                Cycle::Backoff => self.backoff(Some(deadline)).await,
                Cycle::Abandon(reason) => {
                    break GroupOutcome::Abandoned {
                        placed,
                        remaining: group.len(),
                        reason,
                    };
                }
            }
        };

        match &outcome {
            GroupOutcome::Placed { .. } => self.metrics.group_completed(),
            other => {
                self.metrics.group_abandoned(other.remaining());
                warn!(
                    group = %group.signature(),
                    remaining = other.remaining(),
                    total,
                    ?other,
                    "could not place all tasks in group"
                );
            }
        }
        outcome
    }

    /// One acquire → pack → commit → release cycle.
    async fn place_cycle(&self, group: &mut TaskGroup, placed: &mut usize) -> Cycle {
        let offers = match self.offers.acquire(group.constraint(), group.len()).await {
            Ok(offers) if offers.is_empty() => return Cycle::Backoff,
            Ok(offers) => offers,
            Err(e) => return Cycle::from_policy(e.retry_policy(), || e.to_string()),
        };

        let usage = group.usage();
        let mut tasks = group.take_tasks();
        let mut packings: Vec<Packing> = Vec::new();
        for offer in &offers {
            if tasks.is_empty() {
                break;
            }
            let started = Instant::now();
            let (packing, rest) = pack(tasks, &usage, offer);
            tasks = rest;
            if let Some(packing) = packing {
                self.metrics.placement_created(started.elapsed());
                packings.push(packing);
            }
        }
        group.set_tasks(tasks);

        if packings.is_empty() {
            // Offers matched the constraint but none could take a task.
            self.release_all(&offers).await;
            return Cycle::Backoff;
        }

        let placements: Vec<_> = packings.iter().map(|p| p.placement.clone()).collect();
        match self.committer.commit(&placements).await {
            Ok(()) => {
                *placed += packings.iter().map(|p| p.tasks.len()).sum::<usize>();
                let unused = unconsumed(&offers, &packings);
                self.release_all(&unused).await;
                debug!(
                    group = %group.signature(),
                    remaining = group.len(),
                    "tasks remaining for next cycle"
                );
                Cycle::Continue
            }
            Err(e) if e.outcome_unknown() => {
                // The batch may be recorded: keep its offers leased and
                // let the resource manager hand back what it lacks.
                let unconfirmed: usize = packings.iter().map(|p| p.tasks.len()).sum();
                warn!(
                    group = %group.signature(),
                    error = %e,
                    tasks = unconfirmed,
                    "placement outcome unknown, tasks left to resource manager"
                );
                self.metrics.tasks_unconfirmed(unconfirmed);
                let unused = unconsumed(&offers, &packings);
                self.release_all(&unused).await;
                Cycle::from_policy(e.retry_policy(), || e.to_string())
            }
            Err(e) => {
                self.release_all(&offers).await;
                let accepted: Vec<_> = packings.into_iter().flat_map(|p| p.tasks).collect();
                group.reinsert_front(accepted);
                Cycle::from_policy(e.retry_policy(), || e.to_string())
            }
        }
    }

    /// Release offers, logging failures. The host manager reclaims
    /// unreleased leases when they expire.
    async fn release_all(&self, offers: &[HostOffer]) {
        if let Err(e) = self.offers.release(offers).await {
            warn!(error = %e, offers = offers.len(), "unused offers not returned");
        }
    }
}

/// `now + d`, saturating far in the future instead of overflowing.
fn instant_after(d: Duration) -> TokioInstant {
    let now = TokioInstant::now();
    now.checked_add(d)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Stand-in when a deadline is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Offers acquired this cycle that no packing consumed.
fn unconsumed(offers: &[HostOffer], packings: &[Packing]) -> Vec<HostOffer> {
    let used: Vec<&OfferId> = packings.iter().map(|p| &p.placement.offer_id).collect();
    offers
        .iter()
        .filter(|o| !used.contains(&&o.id))
        .cloned()
        .collect()
}
