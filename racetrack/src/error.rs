//! Control-loop errors.
//!
//! Actor-level errors never escape an actor: they are turned into
//! `Failure` replies. Once a reply reaches the control loop it becomes one of
//! the variants below and propagates to the process boundary.

use racetrack_types::{FailureKind, LifecycleReply};

use crate::runtime::RuntimeError;

#[derive(Debug, thiserror::Error)]
pub enum RaceError {
    /// Misconfiguration or a runtime that could not be set up. Not retried.
    #[error("{0}")]
    Setup(String),

    /// A host or collaborator reported a failure.
    #[error("{message}")]
    Remote { message: String, cause: String },

    /// An actor answered with a reply the protocol does not allow here.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An actor we asked is no longer reachable.
    #[error("could not communicate with {0}")]
    Communication(String),

    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Metrics(#[from] crate::metrics::MetricsError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RaceError {
    /// Convert a `Failure` reply into the matching control-loop error.
    pub fn from_failure(kind: FailureKind, message: String, cause: String) -> Self {
        match kind {
            FailureKind::Setup => RaceError::Setup(message),
            FailureKind::Launch | FailureKind::Execution => RaceError::Remote { message, cause },
        }
    }

    /// Error for a reply that is neither the expected one nor a failure.
    pub fn unexpected(expected: &str, reply: &LifecycleReply) -> Self {
        RaceError::Protocol(format!(
            "expected {expected} but received {}",
            reply.name()
        ))
    }

    /// Cause text to show below the message, if there is one.
    pub fn cause(&self) -> Option<&str> {
        match self {
            RaceError::Remote { cause, .. } if !cause.is_empty() => Some(cause),
            _ => None,
        }
    }
}
