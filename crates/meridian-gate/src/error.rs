//! The error union raised by the healthy-session gate.

use meridian_types::{MeridianError, RetryHint};
use thiserror::Error;

/// Errors raised by `with_healthy_session_lock`.
#[derive(Debug, Error)]
pub enum GateError {
    /// Another process holds a live lock on this session.
    #[error("session is locked by another writer")]
    Locked {
        /// Suggested backoff before the caller retries.
        retry: RetryHint,
    },
    /// The session's event log failed its integrity check.
    #[error("session is not healthy: {location}: {reason}")]
    NotHealthy {
        /// Which end of the hash chain failed, or `"invariant"`.
        location: String,
        /// Human-readable detail on what didn't match.
        reason: String,
    },
    /// The session's event log could not be read for reasons other than
    /// corruption (e.g. a filesystem I/O failure).
    #[error("failed to load session: {0}")]
    LoadFailed(String),
    /// The lock itself could not be acquired for reasons other than
    /// contention (e.g. reentrancy, filesystem I/O failure).
    #[error("failed to acquire session lock: {0}")]
    LockAcquireFailed(String),
    /// The lock could not be released after the callback ran.
    #[error("failed to release session lock: {0}")]
    LockReleaseFailed(String),
    /// The caller's body returned an error.
    #[error("gate callback failed: {0}")]
    CallbackFailed(MeridianError),
}

impl From<GateError> for MeridianError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Locked { retry } => MeridianError::TokenSessionLocked { retry },
            GateError::NotHealthy { location, reason } => {
                MeridianError::SessionNotHealthy { location, reason }
            }
            GateError::LoadFailed(reason) => MeridianError::InternalError(reason),
            GateError::LockAcquireFailed(reason) => MeridianError::InternalError(reason),
            GateError::LockReleaseFailed(reason) => MeridianError::InternalError(reason),
            GateError::CallbackFailed(inner) => inner,
        }
    }
}
