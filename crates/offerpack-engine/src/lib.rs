//! offerpack-engine — task placement against leased host offers.
//!
//! The engine pulls pending tasks from a resource manager, groups them by
//! scheduling constraint, leases host offers for each group from a host
//! manager, packs tasks onto offers, and commits the resulting placements:
//!
//! - Groups tasks by structurally equal constraints (one acquisition per group)
//! - Packs a greedy prefix of each group onto every offer
//! - Commits placements all-or-nothing and returns every unused offer
//! - Retries or backs off by error kind until a per-group deadline
//!
//! # Architecture
//!
//! ```text
//! PlacementEngine
//!   ├── TaskDequeuer      (ResourceManager::dequeue_tasks)
//!   ├── group_tasks()     (TaskGroup per ConstraintSignature)
//!   ├── OfferClient       (HostManager::acquire/release_host_offers)
//!   ├── pack()            (greedy prefix per offer)
//!   └── PlacementCommitter (ResourceManager::set_placements)
//! ```

pub mod authority;
pub mod committer;
pub mod dequeue;
pub mod engine;
pub mod error;
pub mod grouper;
pub mod memory;
pub mod metrics;
pub mod offers;
pub mod packer;

pub use authority::{HostManager, ResourceManager, procedures};
pub use committer::PlacementCommitter;
pub use dequeue::TaskDequeuer;
pub use engine::{EngineSettings, GroupOutcome, PlacementEngine};
pub use error::{AuthorityError, AuthorityResult, EngineError, EngineResult, ErrorKind, RetryPolicy};
pub use grouper::{TaskGroup, group_tasks};
pub use memory::{HostManagerStats, MemoryHostManager, MemoryResourceManager, ResourceManagerStats};
pub use metrics::{MetricsSnapshot, PlacementMetrics, render_prometheus};
pub use offers::OfferClient;
pub use packer::{Packing, pack};
