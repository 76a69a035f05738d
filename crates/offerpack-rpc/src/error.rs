//! Transport errors and their classification for the engine.

use std::time::Duration;

use thiserror::Error;

use offerpack_engine::{AuthorityError, ErrorKind};

use crate::wire::{WireError, WireErrorCode};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http handshake: {0}")]
    Handshake(#[source] hyper::Error),

    /// The request was sent but no complete reply arrived.
    #[error("exchange interrupted: {0}")]
    Interrupted(#[source] hyper::Error),

    #[error("build request: {0}")]
    Request(#[from] http::Error),

    #[error("http status {status}: {body}")]
    Status { status: http::StatusCode, body: String },

    #[error("encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("no response after {0:?}")]
    Timeout(Duration),

    #[error("{}", .0.message)]
    Remote(WireError),
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Connect { .. } | RpcError::Handshake(_) | RpcError::Status { .. } => {
                ErrorKind::Unavailable
            }
            // Either way the authority may have acted on the request.
            RpcError::Timeout(_) | RpcError::Interrupted(_) => ErrorKind::Timeout,
            RpcError::Decode(_) => ErrorKind::Application,
            RpcError::InvalidEndpoint { .. } | RpcError::Request(_) | RpcError::Encode(_) => {
                ErrorKind::InvalidArgument
            }
            RpcError::Remote(e) => match e.code {
                WireErrorCode::InvalidArgument => ErrorKind::InvalidArgument,
                WireErrorCode::Unavailable => ErrorKind::Unavailable,
                WireErrorCode::Failure => ErrorKind::Application,
            },
        }
    }

    /// Convert into the engine's error for `procedure`.
    pub fn into_authority(self, procedure: &str) -> AuthorityError {
        AuthorityError::new(self.kind(), procedure, self.to_string())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
