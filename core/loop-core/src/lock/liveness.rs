//! Process liveness checks for lock holders.
//!
//! Operating systems reuse PIDs. A lock with PID 12345 might refer to a
//! listener that exited while an unrelated process now owns that PID, so lock
//! records carry the holder's start time and a live PID whose start time
//! differs is treated as dead.

use sysinfo::{Pid, ProcessRefreshKind, System};

/// Allowed drift between the recorded and the observed start time.
const START_TIME_TOLERANCE_SECS: u64 = 2;

/// Signal-0 check. `None` when checking is impossible on this platform or for
/// this PID value.
pub fn is_pid_alive(pid: u32) -> Option<bool> {
    #[cfg(unix)]
    {
        let raw = i32::try_from(pid).ok().filter(|raw| *raw > 0)?;
        // SAFETY: signal 0 only performs existence and permission checks.
        let rc = unsafe { libc::kill(raw, 0) };
        if rc == 0 {
            return Some(true);
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Some(false),
            // The process exists but belongs to someone else.
            Some(libc::EPERM) => Some(true),
            _ => None,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        None
    }
}

/// Start time of a process (Unix seconds), if it can be queried.
pub fn process_start_time(pid: u32) -> Option<u64> {
    let mut sys = System::new();
    let sys_pid = Pid::from(pid as usize);
    sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
    sys.process(sys_pid).map(|process| process.start_time())
}

/// Liveness of a lock holder: `Some(false)` if provably dead or recycled,
/// `Some(true)` if alive, `None` if it cannot be determined.
pub fn check_holder(pid: u32, expected_start: Option<u64>) -> Option<bool> {
    if !is_pid_alive(pid)? {
        return Some(false);
    }
    let Some(expected) = expected_start else {
        return Some(true);
    };
    match process_start_time(pid) {
        Some(actual) => Some(actual.abs_diff(expected) <= START_TIME_TOLERANCE_SECS),
        // Alive per signal 0 but not inspectable; trust the signal.
        None => Some(true),
    }
}
