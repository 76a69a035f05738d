//! Engine error types and retry classification.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classification of a failed call to a remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure: connection refused, reset, non-2xx status.
    Unavailable,
    /// No complete reply arrived: the call timed out or the exchange broke
    /// after the request was sent. The authority may have acted on it.
    Timeout,
    /// The authority answered with an application-level error payload.
    Application,
    /// The request violated the caller contract and will never succeed.
    InvalidArgument,
}

impl ErrorKind {
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            // The call already waited out its whole timeout.
            ErrorKind::Timeout => RetryPolicy::Immediate,
            ErrorKind::Unavailable | ErrorKind::Application => RetryPolicy::Backoff,
            ErrorKind::InvalidArgument => RetryPolicy::Abandon,
        }
    }

    /// Whether the failed call may still have taken effect.
    pub fn outcome_unknown(self) -> bool {
        self == ErrorKind::Timeout
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Application => "application",
            ErrorKind::InvalidArgument => "invalid argument",
        };
        f.write_str(s)
    }
}

/// What a group worker does after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Loop back to acquisition without sleeping.
    Immediate,
    /// Sleep the backoff interval, then loop back.
    Backoff,
    /// Give up on the group for this round.
    Abandon,
}

/// A failed call to the resource manager or host manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{procedure} failed ({kind}): {message}")]
pub struct AuthorityError {
    pub kind: ErrorKind,
    pub procedure: String,
    pub message: String,
}

impl AuthorityError {
    pub fn new(kind: ErrorKind, procedure: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            procedure: procedure.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(procedure: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, procedure, message)
    }

    pub fn timeout(procedure: impl Into<String>, after: Duration) -> Self {
        Self::new(ErrorKind::Timeout, procedure, format!("no response after {after:?}"))
    }

    pub fn application(procedure: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application, procedure, message)
    }

    pub fn invalid_argument(procedure: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, procedure, message)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.kind.retry_policy()
    }
}

pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Errors surfaced by engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A commit was attempted with nothing to commit.
    #[error("no placements to set")]
    EmptyCommit,

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

impl EngineError {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            EngineError::EmptyCommit => RetryPolicy::Abandon,
            EngineError::Authority(e) => e.retry_policy(),
        }
    }

    pub fn outcome_unknown(&self) -> bool {
        match self {
            EngineError::EmptyCommit => false,
            EngineError::Authority(e) => e.kind.outcome_unknown(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
