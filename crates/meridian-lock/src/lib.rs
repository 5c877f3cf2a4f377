#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-lock** – The advisory, heartbeat-refreshed per-session
//! filesystem lock.
//!
//! `sessions/<sessionId>/lock` holds `{ownerPid, acquiredAtMs,
//! heartbeatAtMs}`. Acquisition creates the file exclusively; if it already
//! exists, a live, non-stale owner yields `Busy`, while a stale one is
//! atomically reclaimed. The lock is advisory (nothing stops a rogue process
//! from deleting or ignoring it) and non-reentrant within a process.

/// The error union raised by `acquire`/`release`/`heartbeat`.
pub mod error;
/// Best-effort owner-PID liveness check.
pub mod process;

pub use error::LockError;

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::Mutex;

use meridian_types::{LockWitness, RetryHint, SessionId, LOCK_RETRY_AFTER_MS, LOCK_TTL_MS};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Sessions currently locked by this process, guarding against reentrancy.
/// A lock file alone cannot detect reentrancy (the same process re-creating
/// its own lock file would simply succeed), so this process-local registry
/// is the actual enforcement point.
static HELD_BY_THIS_PROCESS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// On-disk shape of `sessions/<sessionId>/lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFile {
    owner_pid: u32,
    acquired_at_ms: u64,
    heartbeat_at_ms: u64,
}

/// A handle onto one session's lock file. Cheap to construct.
#[derive(Debug, Clone)]
pub struct SessionLock {
    session_id: SessionId,
    lock_path: PathBuf,
    ttl_ms: u64,
}

impl SessionLock {
    /// Point at `<data_dir>/sessions/<sessionId>/lock`, with the default
    /// 5-second staleness TTL.
    pub fn at(data_dir: impl Into<PathBuf>, session_id: SessionId) -> Self {
        let lock_path = data_dir
            .into()
            .join("sessions")
            .join(session_id.as_str())
            .join("lock");
        Self {
            session_id,
            lock_path,
            ttl_ms: LOCK_TTL_MS,
        }
    }

    /// Override the default staleness TTL.
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Acquire the lock, using the wall clock for staleness checks.
    pub fn acquire(&self) -> Result<LockWitness, LockError> {
        self.acquire_at(now_ms())
    }

    /// Acquire the lock as of `now_ms`. Exposed for deterministic tests of
    /// the staleness window.
    pub fn acquire_at(&self, now_ms: u64) -> Result<LockWitness, LockError> {
        {
            let mut held = HELD_BY_THIS_PROCESS.lock().expect("lock registry poisoned");
            if held.contains(self.session_id.as_str()) {
                return Err(LockError::Reentrant);
            }
            // Reserve optimistically; rolled back below on failure.
            held.insert(self.session_id.as_str().to_string());
        }

        match self.try_create(now_ms) {
            Ok(witness) => Ok(witness),
            Err(e) => {
                let mut held = HELD_BY_THIS_PROCESS.lock().expect("lock registry poisoned");
                held.remove(self.session_id.as_str());
                Err(e)
            }
        }
    }

    fn try_create(&self, now_ms: u64) -> Result<LockWitness, LockError> {
        let parent = self.lock_path.parent().expect("lock path always has a parent");
        fs::create_dir_all(parent)?;

        let record = LockFile {
            owner_pid: std::process::id(),
            acquired_at_ms: now_ms,
            heartbeat_at_ms: now_ms,
        };

        match self.write_exclusive(&record) {
            Ok(()) => {
                debug!(session_id = %self.session_id, "acquired session lock");
                return Ok(LockWitness::new(self.session_id.clone(), now_ms));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let existing = self.read_lock_file()?;
        let stale = !process::is_alive(existing.owner_pid) || existing.heartbeat_at_ms + self.ttl_ms < now_ms;

        if !stale {
            return Err(LockError::Busy {
                retry: RetryHint {
                    after_ms: LOCK_RETRY_AFTER_MS,
                },
            });
        }

        warn!(
            session_id = %self.session_id,
            stale_owner_pid = existing.owner_pid,
            "reclaiming stale session lock"
        );
        self.write_atomic(&record)?;
        Ok(LockWitness::new(self.session_id.clone(), now_ms))
    }

    /// Refresh the heartbeat on a lock this process holds. Call after every
    /// event-log append.
    pub fn heartbeat(&self, witness: &LockWitness) -> Result<(), LockError> {
        self.heartbeat_at(witness, now_ms())
    }

    /// `heartbeat` with an injected clock, for tests.
    pub fn heartbeat_at(&self, witness: &LockWitness, now_ms: u64) -> Result<(), LockError> {
        let mut record = self.read_lock_file()?;
        record.heartbeat_at_ms = now_ms;
        let _ = witness;
        self.write_atomic(&record)
    }

    /// Release the lock, deleting the lock file and clearing the
    /// in-process reentrancy guard.
    pub fn release(&self, witness: LockWitness) -> Result<(), LockError> {
        let _ = witness;
        match fs::remove_file(&self.lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LockError::ReleaseFailed(e.to_string())),
        }
        HELD_BY_THIS_PROCESS
            .lock()
            .expect("lock registry poisoned")
            .remove(self.session_id.as_str());
        debug!(session_id = %self.session_id, "released session lock");
        Ok(())
    }

    fn write_exclusive(&self, record: &LockFile) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)?;
        file.write_all(&serde_json::to_vec(record).expect("LockFile always serializes"))?;
        file.sync_all()
    }

    fn write_atomic(&self, record: &LockFile) -> Result<(), LockError> {
        let parent = self.lock_path.parent().expect("lock path always has a parent");
        let tmp_path = parent.join(format!(".lock.tmp-{}", std::process::id()));
        fs::write(&tmp_path, serde_json::to_vec(record).expect("LockFile always serializes"))?;
        fs::rename(&tmp_path, &self.lock_path)?;
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn read_lock_file(&self) -> Result<LockFile, LockError> {
        let bytes = fs::read(&self.lock_path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LockError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_session() -> SessionId {
        SessionId::new()
    }

    #[test]
    fn acquire_then_release_allows_reacquiring() {
        let dir = tempfile::tempdir().unwrap();
        let session = fresh_session();
        let lock = SessionLock::at(dir.path(), session.clone());

        let witness = lock.acquire().unwrap();
        lock.release(witness).unwrap();

        assert!(lock.acquire().is_ok());
    }

    #[test]
    fn reacquiring_within_the_same_process_is_reentrant_and_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session = fresh_session();
        let lock = SessionLock::at(dir.path(), session.clone());

        let _witness = lock.acquire().unwrap();
        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, LockError::Reentrant));
    }

    #[test]
    fn a_live_heartbeat_within_the_ttl_yields_busy() {
        let dir = tempfile::tempdir().unwrap();
        let session = fresh_session();
        let owner_lock = SessionLock::at(dir.path(), session.clone());
        owner_lock.acquire_at(1_000).unwrap();

        let contender_session = session.clone();
        let contender = SessionLock::at(dir.path(), contender_session);
        // The in-process reentrancy guard would otherwise fire first; use a
        // fresh lock handle for a *different* logical session id pointed at
        // the same path to isolate the busy/stale path under test.
        HELD_BY_THIS_PROCESS.lock().unwrap().remove(session.as_str());
        let err = contender.acquire_at(1_500).unwrap_err();
        assert!(matches!(err, LockError::Busy { .. }));
    }

    #[test]
    fn a_heartbeat_past_the_ttl_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let session = fresh_session();
        let owner_lock = SessionLock::at(dir.path(), session.clone()).with_ttl_ms(1_000);
        owner_lock.acquire_at(0).unwrap();
        HELD_BY_THIS_PROCESS.lock().unwrap().remove(session.as_str());

        let contender = SessionLock::at(dir.path(), session.clone()).with_ttl_ms(1_000);
        let witness = contender.acquire_at(5_000).unwrap();
        assert_eq!(witness.session_id(), &session);
    }

    #[test]
    fn heartbeat_updates_the_persisted_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let session = fresh_session();
        let lock = SessionLock::at(dir.path(), session.clone());
        let witness = lock.acquire_at(0).unwrap();
        lock.heartbeat_at(&witness, 42).unwrap();

        let record = lock.read_lock_file().unwrap();
        assert_eq!(record.heartbeat_at_ms, 42);
    }

    #[test]
    fn release_is_idempotent_when_the_file_is_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let session = fresh_session();
        let lock = SessionLock::at(dir.path(), session.clone());
        let witness = lock.acquire().unwrap();
        fs::remove_file(&lock.lock_path).unwrap();
        assert!(lock.release(witness).is_ok());
    }
}
