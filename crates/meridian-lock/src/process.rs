//! Best-effort liveness check for a lock's recorded owner PID.
//!
//! Staleness detection leans on the heartbeat TTL primarily; the PID check
//! is a fast path that reclaims a dead owner's lock before the TTL would
//! otherwise expire.

/// Whether `pid` appears to be a running process. Conservatively returns
/// `true` (defers entirely to heartbeat staleness) on platforms without a
/// `/proc` filesystem.
#[cfg(target_os = "linux")]
pub fn is_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
pub fn is_alive(_pid: u32) -> bool {
    true
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn the_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn an_implausibly_large_pid_is_not_alive() {
        assert!(!is_alive(u32::MAX));
    }
}
