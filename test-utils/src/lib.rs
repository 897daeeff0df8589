//! Test support for linkboot.
//!
//! [`RecordingSystem`] stands in for the host: it records every call the
//! boot sequence makes, can be told to fail any operation, and keeps the
//! service user's home in a temporary directory so PID file handling runs
//! against a real filesystem.

use linkboot::errors::{BootResult, SystemError};
use linkboot::identity::TargetUser;
use linkboot::launch::LaunchSpec;
use linkboot::pidfile::{self, ClearedPidFile};
use linkboot::serial::SerialSettings;
use linkboot::System;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A call made through [`System`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Run { program: PathBuf, args: Vec<String> },
    ConfigureSerial(SerialSettings),
    WriteDevice { path: PathBuf, bytes: Vec<u8> },
    ClearPidFile(PathBuf),
    ResolveUser(u32),
    Exec(LaunchSpec),
}

/// Operations that can be made to fail.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Fail `run` for this program.
    Run(PathBuf),
    ConfigureSerial,
    WriteDevice,
    ClearPidFile,
    ResolveUser,
    Exec,
}

/// Recording fake of the host.
pub struct RecordingSystem {
    calls: Mutex<Vec<Call>>,
    faults: Mutex<HashSet<Fault>>,
    /// iptables rules present, as their argument lists after the operation
    rules: Mutex<Vec<Vec<String>>>,
    user: TargetUser,
    _home: TempDir,
}

impl RecordingSystem {
    /// Fake host whose uid 1000 user lives in a fresh temp directory.
    pub fn new() -> Self {
        let home = TempDir::new().expect("Failed to create temp home");
        let user = TargetUser {
            name: "pi".into(),
            uid: 1000,
            gid: 1000,
            home: home.path().to_path_buf(),
            shell: PathBuf::from("/bin/bash"),
        };
        Self {
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(HashSet::new()),
            rules: Mutex::new(Vec::new()),
            user,
            _home: home,
        }
    }

    /// Make `fault` fail from now on.
    pub fn fail(&self, fault: Fault) -> &Self {
        self.faults.lock().insert(fault);
        self
    }

    /// Pretend a rule with these `-A` arguments is already installed.
    pub fn with_rule(&self, append_args: Vec<String>) -> &Self {
        self.rules.lock().push(strip_operation(&append_args));
        self
    }

    pub fn user(&self) -> &TargetUser {
        &self.user
    }

    pub fn home(&self) -> &Path {
        &self.user.home
    }

    /// Write a PID file into the fake home.
    pub fn write_pid_file(&self, name: &str, pid: u32) -> PathBuf {
        let path = self.home().join(name);
        std::fs::write(&path, format!("{pid}\n")).expect("Failed to write PID file");
        path
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Argument lists of every `run` of `program`.
    pub fn runs_of(&self, program: &Path) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Run { program: p, args } if p == program => Some(args.clone()),
                _ => None,
            })
            .collect()
    }

    /// Rules installed so far, duplicates included.
    pub fn installed_rules(&self) -> Vec<Vec<String>> {
        self.rules.lock().clone()
    }

    /// Index of the first call matching `pred`.
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.lock().iter().position(pred)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(&self, fault: &Fault) -> BootResult<()> {
        if self.faults.lock().contains(fault) {
            return Err(io::Error::other(format!("injected fault: {fault:?}")).into());
        }
        Ok(())
    }
}

impl Default for RecordingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the `-A`/`-C` operation so appended and checked rules compare equal.
fn strip_operation(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|a| a.as_str() != "-A" && a.as_str() != "-C")
        .cloned()
        .collect()
}

impl System for RecordingSystem {
    fn run(&self, program: &Path, args: &[String]) -> BootResult<()> {
        self.record(Call::Run {
            program: program.to_path_buf(),
            args: args.to_vec(),
        });
        self.check(&Fault::Run(program.to_path_buf()))?;

        let rule = strip_operation(args);
        if args.iter().any(|a| a == "-C") {
            if self.rules.lock().contains(&rule) {
                return Ok(());
            }
            return Err(SystemError::CommandFailed {
                program: program.to_path_buf(),
                status: "exit status: 1".into(),
            }
            .into());
        }
        if args.iter().any(|a| a == "-A") {
            self.rules.lock().push(rule);
        }
        Ok(())
    }

    fn configure_serial(&self, settings: &SerialSettings) -> BootResult<()> {
        self.record(Call::ConfigureSerial(settings.clone()));
        self.check(&Fault::ConfigureSerial)
    }

    fn write_device(&self, path: &Path, bytes: &[u8]) -> BootResult<()> {
        self.record(Call::WriteDevice {
            path: path.to_path_buf(),
            bytes: bytes.to_vec(),
        });
        self.check(&Fault::WriteDevice)
    }

    fn clear_pid_file(&self, path: &Path) -> BootResult<ClearedPidFile> {
        self.record(Call::ClearPidFile(path.to_path_buf()));
        self.check(&Fault::ClearPidFile)?;
        pidfile::clear_pid_file(path)
    }

    fn resolve_user(&self, uid: u32) -> BootResult<TargetUser> {
        self.record(Call::ResolveUser(uid));
        self.check(&Fault::ResolveUser)?;
        if uid != self.user.uid {
            return Err(SystemError::UnknownUser(uid).into());
        }
        Ok(self.user.clone())
    }

    fn exec(&self, spec: &LaunchSpec) -> BootResult<()> {
        self.record(Call::Exec(spec.clone()));
        self.check(&Fault::Exec)
    }
}
