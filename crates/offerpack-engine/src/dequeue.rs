//! Task dequeuer — pulls pending tasks from the resource manager.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use offerpack_core::Task;

use crate::authority::{ResourceManager, procedures};
use crate::error::{AuthorityError, AuthorityResult};
use crate::metrics::PlacementMetrics;

pub struct TaskDequeuer {
    resource_manager: Arc<dyn ResourceManager>,
    limit: u32,
    /// How long the resource manager may wait for tasks to appear.
    wait: Duration,
    timeout: Duration,
    metrics: Arc<PlacementMetrics>,
}

impl TaskDequeuer {
    pub fn new(
        resource_manager: Arc<dyn ResourceManager>,
        limit: u32,
        wait: Duration,
        timeout: Duration,
        metrics: Arc<PlacementMetrics>,
    ) -> Self {
        Self {
            resource_manager,
            limit,
            wait,
            timeout,
            metrics,
        }
    }

    /// Dequeue up to the configured limit of tasks.
    ///
    /// The call runs on its own task so that a panic inside the client
    /// comes back as an `Unavailable` error instead of unwinding into the
    /// round loop.
    pub async fn dequeue(&self) -> AuthorityResult<Vec<Task>> {
        let rm = self.resource_manager.clone();
        let (limit, wait, timeout) = (self.limit, self.wait, self.timeout);

        debug!(limit, wait = ?wait, "dequeuing tasks");
        let handle = tokio::spawn(async move {
            tokio::time::timeout(timeout, rm.dequeue_tasks(limit, wait))
                .await
                .unwrap_or_else(|_| Err(AuthorityError::timeout(procedures::DEQUEUE_TASKS, timeout)))
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let reason = panic_message(join_err.into_panic());
                Err(AuthorityError::unavailable(
                    procedures::DEQUEUE_TASKS,
                    format!("recovered from panic: {reason}"),
                ))
            }
            Err(join_err) => Err(AuthorityError::unavailable(
                procedures::DEQUEUE_TASKS,
                join_err.to_string(),
            )),
        };

        match result {
            Ok(tasks) => {
                self.metrics.task_dequeued(tasks.len());
                debug!(tasks = tasks.len(), "dequeued tasks");
                Ok(tasks)
            }
            Err(e) => {
                self.metrics.task_dequeue_failed();
                error!(error = %e, kind = %e.kind, "dequeue failed");
                Err(e)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
