//! Boundary traits for the two remote authorities.
//!
//! The resource manager owns the pending-task queue and the placement
//! ledger. The host manager owns host inventory and offer leases. Both are
//! injected as trait objects so the engine runs unchanged against the RPC
//! transport or the in-memory implementations in [`crate::memory`].

use std::time::Duration;

use async_trait::async_trait;

use offerpack_core::{Constraint, HostOffer, Placement, Task};

use crate::error::AuthorityResult;

/// Fully qualified procedure names, shared by logs and the RPC transport.
pub mod procedures {
    pub const DEQUEUE_TASKS: &str = "ResourceManagerService.DequeueTasks";
    pub const SET_PLACEMENTS: &str = "ResourceManagerService.SetPlacements";
    pub const ACQUIRE_HOST_OFFERS: &str = "InternalHostService.AcquireHostOffers";
    pub const RELEASE_HOST_OFFERS: &str = "InternalHostService.ReleaseHostOffers";
}

#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Pull up to `limit` pending tasks, waiting up to `timeout` for any.
    async fn dequeue_tasks(&self, limit: u32, timeout: Duration) -> AuthorityResult<Vec<Task>>;

    /// Record a batch of placements. All-or-nothing.
    async fn set_placements(&self, placements: &[Placement]) -> AuthorityResult<()>;
}

#[async_trait]
pub trait HostManager: Send + Sync {
    /// Lease up to `constraint.host_limit` offers matching `constraint`.
    async fn acquire_host_offers(&self, constraint: &Constraint) -> AuthorityResult<Vec<HostOffer>>;

    /// Return unused offers.
    async fn release_host_offers(&self, offers: &[HostOffer]) -> AuthorityResult<()>;
}
