use std::path::PathBuf;
use thiserror::Error;

use crate::message::comm::Tag;

/// Error to represent every failure the distributed grid can run into. None
/// of these are retried: a simulation that hits one of them is aborted, on
/// every rank.
///
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid dimensions, thresholds, periods or CFL fraction. Detected at
    /// startup, before any collective operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A logic error: refinement level skew, a partition gap, an absent
    /// remote copy, a stale exchange plan.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A halo round was started or waited on out of order.
    #[error("halo round {tag} is still in flight")]
    ConcurrentUpdate { tag: Tag },

    /// A send, receive, codec or collective operation failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The results sink could not open or write its file.
    #[error("rank {rank}: i/o failure on {}: {source}", path.display())]
    Io {
        rank: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}
