//! The error union raised by the session lock.

use std::io;

use meridian_types::{MeridianError, RetryHint};
use thiserror::Error;

/// Errors raised by `acquire`/`release`/`heartbeat`.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds a live lock on this session.
    #[error("session lock is held by another process")]
    Busy {
        /// Suggested backoff before the caller retries.
        retry: RetryHint,
    },
    /// The current process already holds this session's lock; the lock is
    /// non-reentrant.
    #[error("session lock is not reentrant within a process")]
    Reentrant,
    /// Deleting the lock file on release failed; retryable.
    #[error("failed to release session lock: {0}")]
    ReleaseFailed(String),
    /// Underlying filesystem operation failed.
    #[error("session lock io error: {0}")]
    Io(#[from] io::Error),
}

impl From<LockError> for MeridianError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Busy { retry } => MeridianError::TokenSessionLocked { retry },
            LockError::Reentrant => {
                MeridianError::InternalError("session lock reentrancy violation".to_string())
            }
            LockError::ReleaseFailed(reason) => {
                MeridianError::InternalError(format!("lock release failed: {reason}"))
            }
            LockError::Io(e) => MeridianError::InternalError(MeridianError::scrub_home(&e.to_string())),
        }
    }
}
