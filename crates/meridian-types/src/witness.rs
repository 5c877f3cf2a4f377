//! Capability value proving a caller currently holds a session's advisory
//! lock.
//!
//! Like the rest of this system's lock, the witness is advisory rather than
//! compiler-enforced: any crate *can* construct one, but by convention only
//! `meridian-lock`'s `acquire` does, and [`meridian_eventlog`](../meridian_eventlog/index.html)'s
//! `append` requires one as a parameter precisely so a reviewer can see at a
//! glance which call sites are guarded.

use crate::ids::SessionId;

/// Evidence that the caller currently holds `session_id`'s advisory lock.
#[derive(Debug, Clone)]
pub struct LockWitness {
    session_id: SessionId,
    acquired_at_ms: u64,
}

impl LockWitness {
    /// Mint a witness for `session_id`, acquired at `acquired_at_ms`.
    pub fn new(session_id: SessionId, acquired_at_ms: u64) -> Self {
        Self {
            session_id,
            acquired_at_ms,
        }
    }

    /// The session this witness attests to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Epoch millis the lock was acquired at.
    pub fn acquired_at_ms(&self) -> u64 {
        self.acquired_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn witness_carries_the_session_it_was_minted_for() {
        let session = SessionId::parse("sess_a").unwrap();
        let witness = LockWitness::new(session.clone(), 42);
        assert_eq!(witness.session_id(), &session);
        assert_eq!(witness.acquired_at_ms(), 42);
    }
}
