//! The error union surfaced by the session event log.

use std::io;

use meridian_types::MeridianError;
use thiserror::Error;

/// Which end of the hash chain an integrity check failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionLocation {
    /// Event 0's recomputed hash does not match the manifest's `headHash`.
    Head,
    /// The recomputed rolling hash over the full log does not match the
    /// manifest's `tailHash`.
    Tail,
}

impl std::fmt::Display for CorruptionLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Head => "head",
            Self::Tail => "tail",
        })
    }
}

/// Errors a session event log can raise on `load` or `append`.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Underlying filesystem operation failed.
    #[error("event log io error: {0}")]
    Io(#[from] io::Error),
    /// The hash chain recomputed from `events.log` does not match the
    /// manifest. Once raised, the session is fail-closed until exported or
    /// recreated.
    #[error("corruption detected at {location}: {reason}")]
    Corruption {
        /// Which end of the hash chain failed to verify.
        location: CorruptionLocation,
        /// Human-readable detail on what didn't match.
        reason: String,
    },
    /// A structural invariant does not hold over the event stream.
    #[error("event log invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<EventLogError> for MeridianError {
    fn from(err: EventLogError) -> Self {
        match err {
            EventLogError::Io(e) => {
                MeridianError::InternalError(MeridianError::scrub_home(&e.to_string()))
            }
            EventLogError::Corruption { location, reason } => MeridianError::SessionNotHealthy {
                location: location.to_string(),
                reason,
            },
            EventLogError::InvariantViolation(reason) => MeridianError::SessionNotHealthy {
                location: "invariant".to_string(),
                reason,
            },
        }
    }
}
