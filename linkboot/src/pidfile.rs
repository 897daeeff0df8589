//! Stale PID file cleanup.
//!
//! The service refuses to start while its PID file exists, so the file left
//! by a previous run (crash, power loss) is always removed before launch.
//! The recorded PID is only inspected for logging.

use crate::errors::{BootResult, SystemError};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::io;
use std::path::Path;

/// What [`clear_pid_file`] found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClearedPidFile {
    /// No file was present.
    Absent,
    /// File removed.
    Removed {
        /// PID recorded in the file, if it parsed.
        stale_pid: Option<u32>,
        /// Whether that PID still named a live process.
        running: bool,
    },
}

/// Read PID from file.
///
/// The file contains a PID as a decimal string, optionally with a trailing newline.
pub fn read_pid_file(path: &Path) -> io::Result<u32> {
    let content = std::fs::read_to_string(path)?;
    content.trim().parse::<u32>().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid PID '{}': {}", content.trim(), e),
        )
    })
}

/// Check if a process with the given PID exists.
///
/// Sends the null signal. Permission denied still means the process exists.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Remove the PID file at `path`. A missing file is not an error.
pub fn clear_pid_file(path: &Path) -> BootResult<ClearedPidFile> {
    let stale_pid = match read_pid_file(path) {
        Ok(pid) => Some(pid),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ClearedPidFile::Absent),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Unreadable PID file");
            None
        }
    };
    // PIDs repeat across boots; our own PID in the file is a leftover
    let running = stale_pid.is_some_and(|pid| pid != std::process::id() && is_process_alive(pid));

    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ClearedPidFile::Absent),
        Err(e) => {
            return Err(SystemError::PidFile {
                path: path.to_path_buf(),
                source: e,
            }
            .into());
        }
    }

    if running {
        tracing::warn!(
            path = %path.display(),
            pid = stale_pid,
            "Removed PID file of a process that is still running"
        );
    } else {
        tracing::info!(path = %path.display(), pid = stale_pid, "Removed stale PID file");
    }

    Ok(ClearedPidFile::Removed { stale_pid, running })
}
