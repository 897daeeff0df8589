//! The boot sequence.
//!
//! Steps run in a fixed order. Each step before the launch is best-effort:
//! a failure is logged, recorded in the [`BootReport`] and the next step
//! runs anyway. The launch is last; when it succeeds on a real host this
//! process is gone.

use crate::errors::{BootError, BootResult};
use crate::firewall;
use crate::identity::TargetUser;
use crate::launch::LaunchSpec;
use crate::options::BootOptions;
use crate::pidfile::ClearedPidFile;
use crate::system::System;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One step of the boot sequence, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootStep {
    RedirectRules,
    ConfigureSerial,
    SendStatus,
    PrebootHook,
    ClearPidFile,
    LaunchService,
}

impl BootStep {
    pub const ALL: [BootStep; 6] = [
        BootStep::RedirectRules,
        BootStep::ConfigureSerial,
        BootStep::SendStatus,
        BootStep::PrebootHook,
        BootStep::ClearPidFile,
        BootStep::LaunchService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BootStep::RedirectRules => "redirect-rules",
            BootStep::ConfigureSerial => "configure-serial",
            BootStep::SendStatus => "send-status",
            BootStep::PrebootHook => "preboot-hook",
            BootStep::ClearPidFile => "clear-pid-file",
            BootStep::LaunchService => "launch-service",
        }
    }
}

impl fmt::Display for BootStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Failed(String),
    Skipped(String),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Done => f.write_str("done"),
            StepOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            StepOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

/// Outcome of every step that ran, in order.
#[derive(Debug, Default)]
pub struct BootReport {
    steps: Vec<(BootStep, StepOutcome)>,
    launch_error: Option<BootError>,
}

impl BootReport {
    fn record(&mut self, step: BootStep, result: BootResult<StepOutcome>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => StepOutcome::Failed(e.to_string()),
        };
        match &outcome {
            StepOutcome::Done => info!(step = %step, "Boot step done"),
            StepOutcome::Failed(reason) => warn!(step = %step, %reason, "Boot step failed"),
            StepOutcome::Skipped(reason) => warn!(step = %step, %reason, "Boot step skipped"),
        }
        self.steps.push((step, outcome));
    }

    pub fn steps(&self) -> &[(BootStep, StepOutcome)] {
        &self.steps
    }

    pub fn outcome(&self, step: BootStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    /// Whether every step completed.
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|(_, o)| *o == StepOutcome::Done)
    }

    /// The launch error, if the service could not be started.
    ///
    /// Earlier step failures never make a boot fail.
    pub fn into_result(self) -> BootResult<()> {
        match self.launch_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Display for BootReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (step, outcome) in &self.steps {
            writeln!(f, "{step}: {outcome}")?;
        }
        Ok(())
    }
}

/// Runs the boot steps against a [`System`].
pub struct BootSequence<'a, S: System + ?Sized> {
    system: &'a S,
    options: &'a BootOptions,
}

impl<'a, S: System + ?Sized> BootSequence<'a, S> {
    pub fn new(system: &'a S, options: &'a BootOptions) -> Self {
        Self { system, options }
    }

    /// Run every step in order.
    pub fn run(&self) -> BootReport {
        let mut report = BootReport::default();

        report.record(BootStep::RedirectRules, self.install_redirect_rules());
        report.record(BootStep::ConfigureSerial, self.configure_serial());
        report.record(BootStep::SendStatus, self.send_status());

        let user = match self.system.resolve_user(self.options.service.uid) {
            Ok(user) => Ok(user),
            Err(e) => {
                warn!(uid = self.options.service.uid, error = %e, "Cannot resolve service user");
                Err(e)
            }
        };

        report.record(BootStep::PrebootHook, self.run_preboot_hook(user.as_ref()));
        report.record(BootStep::ClearPidFile, self.clear_pid_file(user.as_ref()));

        let launched = match user {
            Ok(user) => self.launch_service(user),
            Err(e) => Err(e),
        };
        match launched {
            Ok(()) => report.record(BootStep::LaunchService, Ok(StepOutcome::Done)),
            Err(e) => {
                report.record(BootStep::LaunchService, Ok(StepOutcome::Failed(e.to_string())));
                report.launch_error = Some(e);
            }
        }

        report
    }

    fn install_redirect_rules(&self) -> BootResult<StepOutcome> {
        let fw = &self.options.firewall;
        let installed =
            firewall::install_redirect_rules(self.system, &fw.iptables, &fw.rules, fw.mode)?;
        info!(installed, total = fw.rules.len(), "Redirect rules processed");
        Ok(StepOutcome::Done)
    }

    fn configure_serial(&self) -> BootResult<StepOutcome> {
        self.system.configure_serial(&self.options.serial.settings())?;
        Ok(StepOutcome::Done)
    }

    fn send_status(&self) -> BootResult<StepOutcome> {
        let serial = &self.options.serial;
        self.system
            .write_device(&serial.device, &serial.status_message.to_line())?;
        info!(
            device = %serial.device.display(),
            status = %serial.status_message,
            "Status sent to printer"
        );
        Ok(StepOutcome::Done)
    }

    fn run_preboot_hook(&self, user: Result<&TargetUser, &BootError>) -> BootResult<StepOutcome> {
        let hook = match user_path(&self.options.service.preboot_hook, user) {
            Ok(path) => path,
            Err(reason) => return Ok(StepOutcome::Skipped(reason)),
        };

        // Exit status is reported, never acted upon
        self.system.run(&hook, &[])?;
        Ok(StepOutcome::Done)
    }

    fn clear_pid_file(&self, user: Result<&TargetUser, &BootError>) -> BootResult<StepOutcome> {
        let path = match user_path(&self.options.service.pid_file, user) {
            Ok(path) => path,
            Err(reason) => return Ok(StepOutcome::Skipped(reason)),
        };

        if let ClearedPidFile::Absent = self.system.clear_pid_file(&path)? {
            tracing::debug!(path = %path.display(), "No PID file to remove");
        }
        Ok(StepOutcome::Done)
    }

    /// Build the launch spec for `user`.
    pub fn launch_spec(&self, user: TargetUser) -> LaunchSpec {
        let service = &self.options.service;
        LaunchSpec::new(
            user.resolve(&service.program),
            service.args.clone(),
            &service.env,
            user,
        )
    }

    fn launch_service(&self, user: TargetUser) -> BootResult<()> {
        let spec = self.launch_spec(user);
        self.system.exec(&spec)
    }
}

/// Resolve a possibly home-relative path, or explain why it cannot be.
fn user_path(path: &Path, user: Result<&TargetUser, &BootError>) -> Result<PathBuf, String> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    match user {
        Ok(user) => Ok(user.resolve(path)),
        Err(e) => Err(format!("{} needs the service user's home: {}", path.display(), e)),
    }
}
