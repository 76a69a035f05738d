//! Request and response bodies for the four authority procedures.
//!
//! Every response may carry an `error`; when present the rest of the
//! body is ignored.

use serde::{Deserialize, Serialize};

use offerpack_core::{Constraint, HostOffer, Placement, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorCode {
    /// The request can never succeed as sent.
    InvalidArgument,
    /// The authority is not ready to serve.
    Unavailable,
    /// Any other refusal.
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: WireErrorCode,
    pub message: String,
}

impl WireError {
    pub fn new(code: WireErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Responses that may carry an application error.
pub trait Reply {
    fn take_error(&mut self) -> Option<WireError>;
}

macro_rules! impl_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl Reply for $ty {
            fn take_error(&mut self) -> Option<WireError> {
                self.error.take()
            }
        })*
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DequeueTasksRequest {
    pub limit: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DequeueTasksResponse {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPlacementsRequest {
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetPlacementsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireHostOffersRequest {
    pub constraint: Constraint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquireHostOffersResponse {
    #[serde(default)]
    pub host_offers: Vec<HostOffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseHostOffersRequest {
    pub host_offers: Vec<HostOffer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseHostOffersResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl_reply!(
    DequeueTasksResponse,
    SetPlacementsResponse,
    AcquireHostOffersResponse,
    ReleaseHostOffersResponse,
);
