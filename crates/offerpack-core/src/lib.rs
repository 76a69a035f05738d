//! offerpack-core — value types shared by the placement engine.
//!
//! - **`resources`** — [`ResourceVector`] and dimension-wise subtraction
//! - **`constraint`** — scheduling constraints and grouping signatures
//! - **`types`** — tasks, host offers, placements
//! - **`config`** — `offerpack.toml` parsing

pub mod config;
pub mod constraint;
pub mod resources;
pub mod types;

pub use config::{ConfigError, MAX_DURATION, PlacementConfig, parse_duration};
pub use constraint::{
    Constraint, ConstraintSignature, LabelCondition, LabelConstraint, LabelKind,
    PlacementConstraint,
};
pub use resources::{InvalidResource, RESOURCE_EPSILON, ResourceVector};
pub use types::{HostOffer, OfferId, Placement, Task, TaskId};
