//! offerpackd — the offerpack daemon.
//!
//! - **`http`** — `/metrics` and `/healthz`
//! - **`simulate`** — the engine against in-memory authorities

pub mod http;
pub mod simulate;

pub use http::build_router;
pub use simulate::{SimulationReport, SimulationSpec, run_simulation};
