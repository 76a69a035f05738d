//! Placement committer — hands placements to the resource manager.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use offerpack_core::Placement;

use crate::authority::{ResourceManager, procedures};
use crate::error::{AuthorityError, EngineError, EngineResult};
use crate::metrics::PlacementMetrics;

pub struct PlacementCommitter {
    resource_manager: Arc<dyn ResourceManager>,
    timeout: Duration,
    metrics: Arc<PlacementMetrics>,
}

impl PlacementCommitter {
    pub fn new(
        resource_manager: Arc<dyn ResourceManager>,
        timeout: Duration,
        metrics: Arc<PlacementMetrics>,
    ) -> Self {
        Self {
            resource_manager,
            timeout,
            metrics,
        }
    }

    /// Commit a batch of placements.
    ///
    /// The batch is all-or-nothing: on error none of it is recorded and
    /// the caller must release every offer it references. An empty batch
    /// is rejected with [`EngineError::EmptyCommit`] without calling out.
    pub async fn commit(&self, placements: &[Placement]) -> EngineResult<()> {
        if placements.is_empty() {
            debug!("no placements to set");
            return Err(EngineError::EmptyCommit);
        }

        let tasks: usize = placements.iter().map(|p| p.tasks.len()).sum();
        debug!(placements = placements.len(), tasks, "calling SetPlacements");

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.resource_manager.set_placements(placements))
            .await
            .unwrap_or_else(|_| Err(AuthorityError::timeout(procedures::SET_PLACEMENTS, self.timeout)));

        match result {
            Ok(()) => {
                self.metrics.placements_set(placements.len(), tasks, started.elapsed());
                info!(placements = placements.len(), tasks, "set placements");
                Ok(())
            }
            Err(e) => {
                self.metrics.set_placement_failed();
                error!(
                    placements = placements.len(),
                    tasks,
                    error = %e,
                    kind = %e.kind,
                    "failed to set placements"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use offerpack_core::{HostOffer, ResourceVector, TaskId};

    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryResourceManager;

    fn placement(offer: &str, tasks: &[&str]) -> Placement {
        let offer = HostOffer::new(offer, format!("host-{offer}"), ResourceVector::cpu_mem(8.0, 8192.0));
        Placement::for_offer(&offer, tasks.iter().map(|t| TaskId::from(*t)).collect())
    }

    fn committer(rm: Arc<MemoryResourceManager>) -> (PlacementCommitter, Arc<PlacementMetrics>) {
        let metrics = Arc::new(PlacementMetrics::new());
        (
            PlacementCommitter::new(rm, Duration::from_secs(10), metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_without_a_call() {
        let rm = Arc::new(MemoryResourceManager::new());
        let (committer, _) = committer(rm.clone());

        let err = committer.commit(&[]).await.unwrap_err();
        assert!(matches!(err, EngineError::EmptyCommit));
        assert_eq!(rm.stats().set_placement_calls, 0);
    }

    #[tokio::test]
    async fn success_records_every_task_once() {
        let rm = Arc::new(MemoryResourceManager::new());
        let (committer, metrics) = committer(rm.clone());

        committer
            .commit(&[placement("o1", &["a", "b"]), placement("o2", &["c"])])
            .await
            .unwrap();

        assert_eq!(rm.placed_count(&TaskId::from("a")), 1);
        assert_eq!(rm.placed_count(&TaskId::from("c")), 1);
        assert_eq!(rm.placements().len(), 2);
        let s = metrics.snapshot();
        assert_eq!(s.set_placement_success, 2);
        assert_eq!(s.tasks_placed, 3);
        assert_eq!(s.set_placement_duration_count, 1);
    }

    #[tokio::test]
    async fn failure_records_nothing() {
        let rm = Arc::new(MemoryResourceManager::new());
        rm.fail_next_set_placements(1, ErrorKind::Application);
        let (committer, metrics) = committer(rm.clone());

        let err = committer
            .commit(&[placement("o1", &["a", "b"]), placement("o2", &["c"])])
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Authority(ref e) if e.kind == ErrorKind::Application));
        assert!(rm.placements().is_empty());
        assert_eq!(rm.placed_count(&TaskId::from("a")), 0);
        assert_eq!(metrics.snapshot().set_placement_fail, 1);
        assert_eq!(metrics.snapshot().tasks_placed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_commit_times_out() {
        let rm = Arc::new(MemoryResourceManager::new());
        rm.set_latency(Duration::from_secs(60));
        let (committer, _) = committer(rm.clone());

        let err = committer.commit(&[placement("o1", &["a"])]).await.unwrap_err();
        assert_eq!(err.retry_policy(), crate::error::RetryPolicy::Immediate);
        assert!(rm.placements().is_empty());
    }
}
