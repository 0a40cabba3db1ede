//! Error types for the dispatch engine.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the pool, rounds and sequences can surface to a caller. Worker-side
//! protocol and application errors are *not* represented here: they travel as
//! data inside [`Response::Err`](crate::Response::Err) so a single failed
//! worker never aborts its siblings.
//!
//! ## Error Cases
//! - `InvalidConfig`: a pool was configured with unusable settings.
//! - `InvalidShard`: a partitioner was constructed with invalid arguments.
//! - `Transport`: the worker behind a request crashed or became unreachable.
//! - `Abandoned`: the pool was closed while the request was outstanding.
//! - `PoolClosed`: work was dispatched to a pool without live workers.
//! - `ChannelError`: an internal communication failure between tasks.
//! - `RoundFailed`: a fail-fast round observed an error response.
//! - `Step`: a `then` step of a sequence failed.
//! - `Instance`: a running sequence instance panicked or its task died.

use std::any::Any;

use crate::message::RequestId;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for pools, rounds and sequences.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The pool configuration cannot be used.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A partitioner was configured with arguments it cannot honor.
    #[error("Invalid shard: {reason}")]
    InvalidShard { reason: String },

    /// The worker owning this request is gone.
    #[error("Transport error for request {id}: {reason}")]
    Transport { id: RequestId, reason: String },

    /// The pool was closed before the request settled.
    #[error("Request {id} abandoned by pool shutdown")]
    Abandoned { id: RequestId },

    /// The pool has no live workers to dispatch to.
    #[error("Worker pool is closed")]
    PoolClosed,

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// A round running under [`JoinPolicy::FailFast`](crate::JoinPolicy)
    /// received an error response.
    #[error("Round failed at request {id}: [{code}] {message}")]
    RoundFailed {
        id: RequestId,
        code: i64,
        message: String,
    },

    /// A transformation step of a sequence failed.
    #[error("Step failed: {reason}")]
    Step { reason: String },

    /// The task driving a sequence instance panicked or was cancelled.
    #[error("Sequence instance failed: {reason}")]
    Instance { reason: String },
}

impl Error {
    /// Shorthand for a failed `then` step.
    pub fn step(reason: impl Into<String>) -> Self {
        Self::Step {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_shard(reason: impl Into<String>) -> Self {
        Self::InvalidShard {
            reason: reason.into(),
        }
    }

    /// The request this error concerns, when it concerns exactly one.
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Transport { id, .. } | Self::Abandoned { id } | Self::RoundFailed { id, .. } => {
                Some(*id)
            }
            _ => None,
        }
    }
}

/// Renders a caught panic payload as `"<unit> panicked: <message>"`.
pub(crate) fn panic_reason(unit: &str, payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("{unit} panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("{unit} panicked: {s}")
    } else {
        format!("{unit} panicked")
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Step {
            reason: format!("{err:#}"),
        }
    }
}
