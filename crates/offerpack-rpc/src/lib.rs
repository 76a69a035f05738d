//! offerpack-rpc — HTTP transport for the resource and host managers.
//!
//! Each procedure is a JSON `POST` to `{base}/{Service}.{Procedure}`.
//! Transport failures and non-2xx statuses classify as `Unavailable`,
//! malformed bodies as `Application`, and a missed deadline as `Timeout`;
//! an `error` object in the reply carries its own code.

pub mod authorities;
pub mod client;
pub mod error;
pub mod wire;

pub use authorities::{HttpHostManager, HttpResourceManager};
pub use client::{Endpoint, JsonClient};
pub use error::{RpcError, RpcResult};
pub use wire::{WireError, WireErrorCode};
