//! Process liveness and termination utilities.

use emuport_shared::errors::{EmuportError, EmuportResult};
use std::fmt::Debug;

/// Answers whether a process id refers to a live process.
///
/// Injected into the lock manager, registry, collector and supervisor so
/// tests can simulate dead and alive owners without spawning processes.
pub trait ProcessLiveness: Send + Sync + Debug {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness backed by `kill(pid, 0)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLiveness;

impl ProcessLiveness for SystemLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }
}

/// Check if a process with the given PID exists.
///
/// Uses `libc::kill(pid, 0)` which sends a null signal to check existence.
/// `EPERM` means the process exists but belongs to another user, which
/// still counts as alive. Zombies count as dead on Linux.
///
/// # Returns
/// * `true` - Process exists
/// * `false` - Process does not exist, is a zombie, or the pid is not a
///   valid target (0 and values beyond `i32::MAX` address process groups)
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }

    let exists = unsafe { libc::kill(pid as i32, 0) == 0 }
        || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);

    exists && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat follows the parenthesized command name,
    // which may itself contain spaces or parentheses.
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map(|state| state == "Z")
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Send a signal to a process.
///
/// Sending to a process that already exited is not an error.
pub fn signal_process(pid: u32, signal: libc::c_int) -> EmuportResult<()> {
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(EmuportError::InvalidArgument(format!(
            "refusing to signal pid {}",
            pid
        )));
    }

    let result = unsafe { libc::kill(pid as i32, signal) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(EmuportError::Process(format!(
                "failed to signal pid {} with {}: {}",
                pid, signal, err
            )));
        }
    }
    Ok(())
}

/// Pid of the process that started this one.
///
/// Short-lived commands record their caller (usually a launcher shell) as
/// the owner of what they allocate.
pub fn parent_pid() -> u32 {
    unsafe { libc::getppid() as u32 }
}

/// Kill a process with SIGKILL.
///
/// # Returns
/// * `true` - Process was killed or doesn't exist
/// * `false` - Failed to kill (permission denied)
pub fn kill_process(pid: u32) -> bool {
    signal_process(pid, libc::SIGKILL).is_ok() || !is_process_alive(pid)
}
