//! Service launch under the unprivileged user.
//!
//! The boot initializer does not supervise the service: it replaces itself
//! with it. Privileges are dropped in a `pre_exec` hook, which here runs in
//! the initializer's own process since `exec` does not fork.

use crate::errors::{BootError, ConfigError, SystemError};
use crate::identity::TargetUser;
use nix::unistd::{Gid, Uid};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

/// Everything needed to start the service.
///
/// The environment is explicit: entries here are added on top of the
/// inherited environment of the initializer, which itself is never modified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub user: TargetUser,
}

impl LaunchSpec {
    /// Build a spec for `user` with the login variables `su` sets for a
    /// non-root target, then `env` on top.
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        env: &BTreeMap<String, String>,
        user: TargetUser,
    ) -> Self {
        let mut full_env = BTreeMap::new();
        full_env.insert("HOME".to_string(), user.home.display().to_string());
        full_env.insert("USER".to_string(), user.name.clone());
        full_env.insert("LOGNAME".to_string(), user.name.clone());
        full_env.insert("SHELL".to_string(), user.shell.display().to_string());
        full_env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            program,
            args,
            env: full_env,
            user,
        }
    }
}

/// Build the command for `spec`, including the privilege drop hook.
///
/// No drop happens when already running as the target uid.
pub fn build_command(spec: &LaunchSpec) -> Result<Command, BootError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.envs(&spec.env);

    let euid = Uid::effective();
    if euid.as_raw() != spec.user.uid {
        if !euid.is_root() {
            return Err(SystemError::privilege_drop(
                spec.user.uid,
                spec.user.gid,
                std::io::Error::from(nix::errno::Errno::EPERM),
            )
            .into());
        }
        add_privilege_drop(&mut cmd, &spec.user)?;
    }

    Ok(cmd)
}

fn add_privilege_drop(cmd: &mut Command, user: &TargetUser) -> Result<(), BootError> {
    let name = CString::new(user.name.as_bytes()).map_err(|e| {
        ConfigError::InvalidService(format!("user name {:?}: {}", user.name, e))
    })?;
    let uid = Uid::from_raw(user.uid);
    let gid = Gid::from_raw(user.gid);

    // SAFETY: `exec` does not fork, so the hook runs in this single-threaded
    // process right before execve and may allocate.
    unsafe {
        cmd.pre_exec(move || {
            // Supplementary groups first, they need CAP_SETGID
            nix::unistd::initgroups(&name, gid)?;
            nix::unistd::setgid(gid)?;
            nix::unistd::setuid(uid)?;
            Ok(())
        });
    }

    Ok(())
}

/// Replace the current process with the service.
///
/// Only returns on failure.
pub fn exec_service(spec: &LaunchSpec) -> BootError {
    let mut cmd = match build_command(spec) {
        Ok(cmd) => cmd,
        Err(e) => return e,
    };

    tracing::info!(
        program = %spec.program.display(),
        args = ?spec.args,
        user = %spec.user.name,
        uid = spec.user.uid,
        "Launching service"
    );

    SystemError::Exec {
        program: spec.program.clone(),
        source: cmd.exec(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::path::Path;

    fn user() -> TargetUser {
        TargetUser {
            name: "pi".into(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/pi"),
            shell: PathBuf::from("/bin/bash"),
        }
    }

    fn spec() -> LaunchSpec {
        let mut env = BTreeMap::new();
        env.insert("PYTHONOPTIMIZE".to_string(), "2".to_string());
        LaunchSpec::new(
            PathBuf::from("/home/pi/.local/bin/prusalink"),
            vec!["-i".into(), "start".into()],
            &env,
            user(),
        )
    }

    #[test]
    fn test_spec_env() {
        let spec = spec();
        assert_eq!(spec.env.get("PYTHONOPTIMIZE").map(String::as_str), Some("2"));
        assert_eq!(spec.env.get("HOME").map(String::as_str), Some("/home/pi"));
        assert_eq!(spec.env.get("USER").map(String::as_str), Some("pi"));
        assert_eq!(spec.env.get("LOGNAME").map(String::as_str), Some("pi"));
        assert_eq!(spec.env.get("SHELL").map(String::as_str), Some("/bin/bash"));
    }

    #[test]
    fn test_configured_env_overrides_login_vars() {
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), "/srv/prusalink".to_string());
        let spec = LaunchSpec::new(PathBuf::from("/bin/true"), vec![], &env, user());
        assert_eq!(spec.env.get("HOME").map(String::as_str), Some("/srv/prusalink"));
    }

    #[test]
    fn test_build_command() {
        // Same uid as the test process, so no privilege drop is needed
        let mut spec = spec();
        spec.user.uid = Uid::effective().as_raw();
        let cmd = build_command(&spec).unwrap();
        assert_eq!(cmd.get_program(), Path::new("/home/pi/.local/bin/prusalink"));

        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(args, vec![OsStr::new("-i"), OsStr::new("start")]);

        let optimize = cmd
            .get_envs()
            .find(|(k, _)| *k == OsStr::new("PYTHONOPTIMIZE"))
            .and_then(|(_, v)| v);
        assert_eq!(optimize, Some(OsStr::new("2")));
    }

    #[test]
    fn test_build_command_needs_root_to_switch_user() {
        if Uid::effective().is_root() {
            return;
        }
        let mut spec = spec();
        spec.user.uid = Uid::effective().as_raw().wrapping_add(1);
        let err = build_command(&spec).unwrap_err();
        assert!(err.to_string().contains("privilege drop"));
    }

    #[test]
    fn test_build_command_rejects_nul_in_user_name() {
        let mut spec = spec();
        spec.user.name = "p\0i".into();
        spec.user.uid = Uid::effective().as_raw().wrapping_add(1);
        assert!(build_command(&spec).is_err());
    }
}
