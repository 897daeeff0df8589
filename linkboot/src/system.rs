//! Host operations used by the boot sequence.
//!
//! Provides abstraction over the side effects of booting:
//! - HostSystem: performs them on this machine
//! - DryRunSystem: logs what would be done and succeeds

use crate::errors::{BootResult, SystemError};
use crate::identity::{self, TargetUser};
use crate::launch::{self, LaunchSpec};
use crate::pidfile::{self, ClearedPidFile};
use crate::serial::{self, SerialSettings};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Side effects of the boot sequence.
pub trait System {
    /// Run `program` to completion. A non-zero exit is an error.
    fn run(&self, program: &Path, args: &[String]) -> BootResult<()>;

    /// Apply line settings to a serial device.
    fn configure_serial(&self, settings: &SerialSettings) -> BootResult<()>;

    /// Write `bytes` to an existing device node.
    fn write_device(&self, path: &Path, bytes: &[u8]) -> BootResult<()>;

    /// Remove a PID file, tolerating its absence.
    fn clear_pid_file(&self, path: &Path) -> BootResult<ClearedPidFile>;

    /// Look up the password database entry for `uid`.
    fn resolve_user(&self, uid: u32) -> BootResult<TargetUser>;

    /// Hand control to the service.
    ///
    /// On a real host this only returns on failure.
    fn exec(&self, spec: &LaunchSpec) -> BootResult<()>;
}

/// Performs every operation on this machine.
pub struct HostSystem;

impl System for HostSystem {
    fn run(&self, program: &Path, args: &[String]) -> BootResult<()> {
        tracing::debug!(program = %program.display(), ?args, "Running command");

        // Output goes straight to our stdio; a helper the child leaves running
        // may hold it open long after the child exits.
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| SystemError::spawn(program, e))?;

        if !status.success() {
            return Err(SystemError::CommandFailed {
                program: program.to_path_buf(),
                status: status.to_string(),
            }
            .into());
        }

        Ok(())
    }

    fn configure_serial(&self, settings: &SerialSettings) -> BootResult<()> {
        serial::configure_serial(settings)
    }

    fn write_device(&self, path: &Path, bytes: &[u8]) -> BootResult<()> {
        serial::write_device(path, bytes)
    }

    fn clear_pid_file(&self, path: &Path) -> BootResult<ClearedPidFile> {
        pidfile::clear_pid_file(path)
    }

    fn resolve_user(&self, uid: u32) -> BootResult<TargetUser> {
        identity::lookup_user(uid)
    }

    fn exec(&self, spec: &LaunchSpec) -> BootResult<()> {
        Err(launch::exec_service(spec))
    }
}

/// Logs every operation instead of performing it.
///
/// User lookups still read the password database so the printed plan shows
/// real paths; an unknown uid gets a placeholder entry under `/home`.
pub struct DryRunSystem;

impl System for DryRunSystem {
    fn run(&self, program: &Path, args: &[String]) -> BootResult<()> {
        tracing::info!(
            "[dry-run] would run: {} {}",
            program.display(),
            args.join(" ")
        );
        Ok(())
    }

    fn configure_serial(&self, settings: &SerialSettings) -> BootResult<()> {
        serial::baud_rate(settings.baud_rate)?;
        tracing::info!(
            "[dry-run] would configure {} at {} baud (hangup on close: {})",
            settings.device.display(),
            settings.baud_rate,
            settings.hangup_on_close
        );
        Ok(())
    }

    fn write_device(&self, path: &Path, bytes: &[u8]) -> BootResult<()> {
        tracing::info!(
            "[dry-run] would write {:?} to {}",
            String::from_utf8_lossy(bytes),
            path.display()
        );
        Ok(())
    }

    fn clear_pid_file(&self, path: &Path) -> BootResult<ClearedPidFile> {
        tracing::info!("[dry-run] would remove {}", path.display());
        Ok(ClearedPidFile::Absent)
    }

    fn resolve_user(&self, uid: u32) -> BootResult<TargetUser> {
        match identity::lookup_user(uid) {
            Ok(user) => Ok(user),
            Err(e) => {
                tracing::info!(uid, error = %e, "[dry-run] using placeholder user");
                Ok(TargetUser {
                    name: format!("uid{uid}"),
                    uid,
                    gid: uid,
                    home: PathBuf::from(format!("/home/{uid}")),
                    shell: PathBuf::from("/bin/sh"),
                })
            }
        }
    }

    fn exec(&self, spec: &LaunchSpec) -> BootResult<()> {
        let env = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            "[dry-run] would exec as {} ({}:{}): {} {} {}",
            spec.user.name,
            spec.user.uid,
            spec.user.gid,
            env,
            spec.program.display(),
            spec.args.join(" ")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_run_success() {
        HostSystem
            .run(Path::new("true"), &[])
            .expect("true exits successfully");
    }

    #[test]
    fn test_host_run_nonzero_exit() {
        let err = HostSystem.run(Path::new("false"), &[]).unwrap_err();
        assert!(err.to_string().contains("false exited with"));
    }

    #[test]
    fn test_host_run_reports_exit_code() {
        let args = vec!["-c".to_string(), "exit 3".to_string()];
        let err = HostSystem.run(Path::new("sh"), &args).unwrap_err();
        assert!(err.to_string().contains("exit status: 3"));
    }

    #[test]
    fn test_host_run_returns_when_child_backgrounds_helper() {
        let args = vec![
            "-c".to_string(),
            "sleep 5 & echo hook-started".to_string(),
        ];
        let start = std::time::Instant::now();
        HostSystem.run(Path::new("sh"), &args).unwrap();
        let elapsed = start.elapsed();
        assert!(
            elapsed < std::time::Duration::from_secs(2),
            "run waited {elapsed:?} for the background helper"
        );
    }

    #[test]
    fn test_host_run_missing_program() {
        let err = HostSystem
            .run(Path::new("/nonexistent/linkboot-hook"), &[])
            .unwrap_err();
        assert!(err.to_string().contains("spawn /nonexistent/linkboot-hook"));
    }

    #[test]
    fn test_dry_run_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let pid = dir.path().join("prusalink.pid");
        std::fs::write(&pid, "1\n").unwrap();
        let device = dir.path().join("ttyAMA0");

        DryRunSystem.write_device(&device, b"M117 x\n").unwrap();
        DryRunSystem.clear_pid_file(&pid).unwrap();

        assert!(pid.exists());
        assert!(!device.exists());
    }

    #[test]
    fn test_dry_run_rejects_bad_baud_rate() {
        let settings = SerialSettings {
            device: PathBuf::from("/dev/ttyAMA0"),
            baud_rate: 1234,
            hangup_on_close: false,
        };
        assert!(DryRunSystem.configure_serial(&settings).is_err());
    }

    #[test]
    fn test_dry_run_placeholder_user() {
        let user = DryRunSystem.resolve_user(3_999_999_999).unwrap();
        assert_eq!(user.home, PathBuf::from("/home/3999999999"));
    }
}
