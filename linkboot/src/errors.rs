//! Hierarchical error types for the boot initializer.
//!
//! Errors are categorized by who can fix them:
//! - [`ConfigError`]: options file or option values (operator-fixable)
//! - [`SystemError`]: host operations that failed at run time
//!
//! During the boot sequence most errors are only logged and recorded in the
//! report. Option loading and the final service launch are the two places
//! where an error becomes the process's exit status.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type BootResult<T> = Result<T, BootError>;

// ============================================================================
// Top-Level Error
// ============================================================================

/// Errors that can occur while booting.
#[derive(Debug, Error)]
pub enum BootError {
    /// Options are unreadable or invalid.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// A host operation failed.
    #[error("system: {0}")]
    System(#[from] SystemError),

    /// Generic IO error (catch-all).
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Config Errors
// ============================================================================

/// Errors related to boot options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Options file could not be read.
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Options file is not valid JSON for [`BootOptions`](crate::options::BootOptions).
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Baud rate has no termios constant.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    /// Redirect rule cannot be expressed as an iptables rule.
    #[error("invalid redirect rule: {0}")]
    InvalidRule(String),

    /// Service launch options are unusable.
    #[error("invalid service options: {0}")]
    InvalidService(String),
}

// ============================================================================
// System Errors
// ============================================================================

/// Errors during host operations.
#[derive(Debug, Error)]
pub enum SystemError {
    /// External program could not be started.
    #[error("spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// External program ran but exited unsuccessfully.
    #[error("{program} exited with {status}")]
    CommandFailed { program: PathBuf, status: String },

    /// Serial line could not be opened or configured.
    #[error("serial {device}: {source}")]
    Serial {
        device: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing to a device failed.
    #[error("write {path}: {source}")]
    DeviceWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// PID file could not be removed.
    #[error("pid file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Password database lookup failed.
    #[error("user lookup for uid {uid}: {source}")]
    UserLookup {
        uid: u32,
        #[source]
        source: io::Error,
    },

    /// No password database entry for the uid.
    #[error("no user with uid {0}")]
    UnknownUser(u32),

    /// Failed to drop privileges to the service user.
    #[error("privilege drop to {uid}:{gid}: {source}")]
    PrivilegeDrop {
        uid: u32,
        gid: u32,
        #[source]
        source: io::Error,
    },

    /// Replacing this process with the service failed.
    #[error("exec {program}: {source}")]
    Exec {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl SystemError {
    /// Create a spawn error.
    pub fn spawn(program: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Create a serial error.
    pub fn serial(device: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Serial {
            device: device.into(),
            source,
        }
    }

    /// Create a privilege drop error.
    pub fn privilege_drop(uid: u32, gid: u32, source: io::Error) -> Self {
        Self::PrivilegeDrop { uid, gid, source }
    }
}
