//! Boot initializer for the PrusaLink printer host.
//!
//! Prepares the host once at start-up and then replaces itself with the
//! PrusaLink service:
//! 1. redirects HTTP (port 80) to the service port
//! 2. configures the printer serial line and shows a status on its display
//! 3. runs the pre-boot hook and removes a stale PID file
//! 4. drops to the service user and execs the service
//!
//! All side effects go through [`System`], so the sequence can be dry-run
//! or driven against a fake.

#[cfg(not(target_os = "linux"))]
compile_error!("linkboot is Linux-only; build with a Linux target");

pub mod boot;
pub mod constants;
pub mod errors;
pub mod firewall;
pub mod identity;
pub mod launch;
pub mod options;
pub mod pidfile;
pub mod serial;
pub mod system;

pub use boot::{BootReport, BootSequence, BootStep, StepOutcome};
pub use errors::{BootError, BootResult};
pub use options::BootOptions;
pub use system::{DryRunSystem, HostSystem, System};
