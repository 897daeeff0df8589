//! Boot options.
//!
//! Every field defaults to the stock printer image, so an empty options file
//! (or none at all) reproduces the stock boot. Relative paths in
//! [`ServiceOptions`] resolve against the service user's home directory.

use crate::constants::{firewall, serial, service};
use crate::errors::{BootResult, ConfigError};
use crate::firewall::{RedirectRule, RuleMode, default_rules};
use crate::serial::{SerialSettings, StatusMessage, baud_rate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// All boot options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootOptions {
    #[serde(default)]
    pub firewall: FirewallOptions,

    #[serde(default)]
    pub serial: SerialOptions,

    #[serde(default)]
    pub service: ServiceOptions,
}

/// Port redirect options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallOptions {
    /// iptables binary.
    ///
    /// Default: `iptables` from PATH
    #[serde(default = "default_iptables")]
    pub iptables: PathBuf,

    /// Append unconditionally or only when missing.
    ///
    /// Default: append
    #[serde(default)]
    pub mode: RuleMode,

    /// Rules installed in order.
    ///
    /// Default: TCP 80 -> 8080 on wlan0, eth0 and loopback
    #[serde(default = "default_rules")]
    pub rules: Vec<RedirectRule>,
}

/// Printer serial line options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialOptions {
    /// Default: /dev/ttyAMA0
    #[serde(default = "default_device")]
    pub device: PathBuf,

    /// Default: 115200
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Keep HUPCL set, letting the printer reset whenever the port closes.
    ///
    /// Default: false
    #[serde(default)]
    pub hangup_on_close: bool,

    /// Text shown on the printer display.
    ///
    /// Default: "Starting PrusaLink"
    #[serde(default = "default_status_message")]
    pub status_message: StatusMessage,
}

/// Service user and launch options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Numeric id of the user the service runs as.
    ///
    /// Default: 1000
    #[serde(default = "default_uid")]
    pub uid: u32,

    /// Helper run (as the initializer's user) before launch.
    ///
    /// Default: ~/.local/bin/prusalink-boot
    #[serde(default = "default_preboot_hook")]
    pub preboot_hook: PathBuf,

    /// Default: ~/prusalink.pid
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Default: ~/.local/bin/prusalink
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Default: ["-i", "start"]
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Extra environment of the service.
    ///
    /// Default: PYTHONOPTIMIZE=2
    #[serde(default = "default_env")]
    pub env: BTreeMap<String, String>,
}

// Default value functions for serde

fn default_iptables() -> PathBuf {
    PathBuf::from(firewall::IPTABLES)
}

fn default_device() -> PathBuf {
    PathBuf::from(serial::DEVICE)
}

fn default_baud_rate() -> u32 {
    serial::BAUD_RATE
}

fn default_status_message() -> StatusMessage {
    StatusMessage::new(serial::STATUS_TEXT)
}

fn default_uid() -> u32 {
    service::UID
}

fn default_preboot_hook() -> PathBuf {
    PathBuf::from(service::PREBOOT_HOOK)
}

fn default_pid_file() -> PathBuf {
    PathBuf::from(service::PID_FILE)
}

fn default_program() -> PathBuf {
    PathBuf::from(service::PROGRAM)
}

fn default_args() -> Vec<String> {
    service::ARGS.iter().map(|s| s.to_string()).collect()
}

fn default_env() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "PYTHONOPTIMIZE".to_string(),
        service::PYTHONOPTIMIZE.to_string(),
    )])
}

impl Default for FirewallOptions {
    fn default() -> Self {
        Self {
            iptables: default_iptables(),
            mode: RuleMode::default(),
            rules: default_rules(),
        }
    }
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            hangup_on_close: false,
            status_message: default_status_message(),
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            uid: default_uid(),
            preboot_hook: default_preboot_hook(),
            pid_file: default_pid_file(),
            program: default_program(),
            args: default_args(),
            env: default_env(),
        }
    }
}

impl SerialOptions {
    pub fn settings(&self) -> SerialSettings {
        SerialSettings {
            device: self.device.clone(),
            baud_rate: self.baud_rate,
            hangup_on_close: self.hangup_on_close,
        }
    }
}

impl BootOptions {
    /// Load options from `path`, or the defaults when `path` is None.
    pub fn load(path: Option<&Path>) -> BootResult<Self> {
        let options = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        options.validate()?;
        Ok(options)
    }

    fn from_file(path: &Path) -> BootResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let options = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::debug!(path = %path.display(), "Loaded boot options");
        Ok(options)
    }

    /// Reject options no boot could succeed with.
    ///
    /// Only checks values knowable without touching the host.
    pub fn validate(&self) -> BootResult<()> {
        for rule in &self.firewall.rules {
            rule.validate()?;
        }

        baud_rate(self.serial.baud_rate)?;

        if self.service.uid == 0 {
            return Err(ConfigError::InvalidService(
                "uid 0 would run the service as root".into(),
            )
            .into());
        }
        if self.service.program.as_os_str().is_empty() {
            return Err(ConfigError::InvalidService("empty program path".into()).into());
        }
        if let Some(key) = self
            .service
            .env
            .keys()
            .find(|k| k.is_empty() || k.contains('=') || k.contains('\0'))
        {
            return Err(
                ConfigError::InvalidService(format!("invalid environment name {key:?}")).into(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::InterfaceMatch;

    #[test]
    fn test_default_options() {
        let opts = BootOptions::default();
        assert_eq!(opts.firewall.rules.len(), 3);
        assert_eq!(opts.firewall.mode, RuleMode::Append);
        assert_eq!(opts.serial.device, PathBuf::from("/dev/ttyAMA0"));
        assert_eq!(opts.serial.baud_rate, 115200);
        assert!(!opts.serial.hangup_on_close);
        assert_eq!(opts.serial.status_message.text(), "Starting PrusaLink");
        assert_eq!(opts.service.uid, 1000);
        assert_eq!(opts.service.args, vec!["-i", "start"]);
        assert_eq!(
            opts.service.env.get("PYTHONOPTIMIZE").map(String::as_str),
            Some("2")
        );
        opts.validate().unwrap();
    }

    #[test]
    fn test_empty_document_is_default() {
        let opts: BootOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, BootOptions::default());
    }

    #[test]
    fn test_partial_document() {
        let json = r#"{
            "firewall": { "mode": "ensure" },
            "serial": { "device": "/dev/ttyACM0", "status_message": "Hello" }
        }"#;
        let opts: BootOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.firewall.mode, RuleMode::Ensure);
        assert_eq!(opts.firewall.rules.len(), 3);
        assert_eq!(opts.serial.device, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(opts.serial.baud_rate, 115200);
        assert_eq!(opts.serial.status_message.to_line(), b"M117 Hello\n".to_vec());
        assert_eq!(opts.service, ServiceOptions::default());
    }

    #[test]
    fn test_serde_roundtrip() {
        let opts = BootOptions::default();
        let json = serde_json::to_string(&opts).unwrap();
        let opts2: BootOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(opts, opts2);
    }

    #[test]
    fn test_load_without_file() {
        assert_eq!(BootOptions::load(None).unwrap(), BootOptions::default());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BootOptions::load(Some(&dir.path().join("boot.json"))).unwrap_err();
        assert!(err.to_string().starts_with("config: read"));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = BootOptions::load(Some(&path)).unwrap_err();
        assert!(err.to_string().starts_with("config: parse"));
    }

    #[test]
    fn test_validate_root_uid() {
        let mut opts = BootOptions::default();
        opts.service.uid = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_validate_bad_rule() {
        let mut opts = BootOptions::default();
        opts.firewall.rules[0].interface = InterfaceMatch::Out("wlan0".into());
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_validate_bad_env_name() {
        let mut opts = BootOptions::default();
        opts.service.env.insert("A=B".into(), "1".into());
        assert!(opts.validate().is_err());
    }
}
