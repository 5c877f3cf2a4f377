#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-gate** – The healthy-session gate: the single
//! scoped primitive that composes the session lock with an integrity-checked
//! load, guaranteeing release on every exit path.

/// The error union raised by `with_healthy_session_lock`.
pub mod error;

pub use error::GateError;

use std::path::Path;

use meridian_eventlog::{EventLog, EventLogError, LoadedLog};
use meridian_lock::{LockError, SessionLock};
use meridian_types::{LockWitness, MeridianError, SessionId};
use tracing::warn;

/// Acquire `session_id`'s advisory lock, load its event log, verify it is
/// healthy, invoke `body` with the witness and the loaded truth, and release
/// the lock on every exit path — success, callback error, or load failure.
///
/// `body` receives the fresh witness (to pass to `EventLog::append`) and the
/// loaded log (to inspect current state before deciding what to append).
pub fn with_healthy_session_lock<T>(
    data_dir: &Path,
    session_id: &SessionId,
    body: impl FnOnce(&LockWitness, &LoadedLog) -> Result<T, MeridianError>,
) -> Result<T, GateError> {
    let lock = SessionLock::at(data_dir, session_id.clone());
    let witness = lock.acquire().map_err(|e| match e {
        LockError::Busy { retry } => GateError::Locked { retry },
        other => GateError::LockAcquireFailed(other.to_string()),
    })?;

    let event_log = EventLog::at(data_dir, session_id);
    let loaded = match event_log.load() {
        Ok(loaded) => loaded,
        Err(e) => {
            let gate_err = translate_load_error(e);
            if let Err(release_err) = lock.release(witness) {
                warn!(error = %release_err, session_id = %session_id, "failed to release lock after a load failure");
            }
            return Err(gate_err);
        }
    };

    let body_result = body(&witness, &loaded);

    match lock.release(witness) {
        Ok(()) => body_result.map_err(GateError::CallbackFailed),
        Err(release_err) if body_result.is_err() => {
            warn!(error = %release_err, session_id = %session_id, "failed to release lock after a callback failure");
            body_result.map_err(GateError::CallbackFailed)
        }
        Err(release_err) => Err(GateError::LockReleaseFailed(release_err.to_string())),
    }
}

fn translate_load_error(err: EventLogError) -> GateError {
    match err {
        EventLogError::Io(e) => GateError::LoadFailed(e.to_string()),
        EventLogError::Corruption { location, reason } => GateError::NotHealthy {
            location: location.to_string(),
            reason,
        },
        EventLogError::InvariantViolation(reason) => GateError::NotHealthy {
            location: "invariant".to_string(),
            reason,
        },
    }
}
