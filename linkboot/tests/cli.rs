use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn linkboot() -> Command {
    let bin_path = env!("CARGO_BIN_EXE_linkboot");
    let mut cmd = Command::new(bin_path);
    cmd.timeout(Duration::from_secs(30));
    cmd.env("RUST_LOG", "error");
    cmd
}

#[test]
fn test_print_config_defaults() {
    linkboot()
        .arg("--print-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("/dev/ttyAMA0"))
        .stdout(predicate::str::contains("\"baud_rate\": 115200"))
        .stdout(predicate::str::contains("Starting PrusaLink"))
        .stdout(predicate::str::contains("PYTHONOPTIMIZE"));
}

#[test]
fn test_print_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boot.json");
    std::fs::write(&path, r#"{ "serial": { "device": "/dev/ttyACM0" } }"#).unwrap();

    linkboot()
        .arg("--config")
        .arg(&path)
        .arg("--print-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("/dev/ttyACM0"))
        .stdout(predicate::str::contains("wlan0"));
}

#[test]
fn test_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();

    linkboot()
        .arg("--config")
        .arg(dir.path().join("absent.json"))
        .arg("--print-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.json"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("boot.json");
    std::fs::write(&path, r#"{ "serial": { "baud_rate": 1234 } }"#).unwrap();

    linkboot()
        .arg("-c")
        .arg(&path)
        .arg("--dry-run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported baud rate 1234"));
}

#[test]
fn test_dry_run_reports_every_step() {
    linkboot()
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("redirect-rules: done"))
        .stdout(predicate::str::contains("configure-serial: done"))
        .stdout(predicate::str::contains("send-status: done"))
        .stdout(predicate::str::contains("preboot-hook: done"))
        .stdout(predicate::str::contains("clear-pid-file: done"))
        .stdout(predicate::str::contains("launch-service: done"));
}

// ============================================================================
// HOST BOOT
// ============================================================================

/// Config for a real boot as the current user, with harmless side effects.
///
/// Returns `None` when running as root or without a passwd entry, since the
/// service uid must be a non-root user this process can exec as.
fn host_config(dir: &Path, program: &str, args: &[&str]) -> Option<PathBuf> {
    let uid = nix::unistd::Uid::effective();
    if uid.is_root() || linkboot::identity::lookup_user(uid.as_raw()).is_err() {
        return None;
    }

    let device = dir.join("ttyFAKE");
    std::fs::write(&device, b"").unwrap();

    let config = serde_json::json!({
        "firewall": { "iptables": "true" },
        "serial": { "device": device },
        "service": {
            "uid": uid.as_raw(),
            "preboot_hook": "/bin/true",
            "pid_file": dir.join("prusalink.pid"),
            "program": program,
            "args": args,
        }
    });
    let path = dir.join("boot.json");
    std::fs::write(&path, config.to_string()).unwrap();
    Some(path)
}

#[test]
fn test_boot_execs_service_with_args_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let Some(config) = host_config(
        dir.path(),
        "/bin/sh",
        &["-c", "echo \"$PYTHONOPTIMIZE $*\"", "sh", "-i", "start"],
    ) else {
        eprintln!("skipping: needs a non-root user with a passwd entry");
        return;
    };
    std::fs::write(dir.path().join("prusalink.pid"), "999999999\n").unwrap();

    linkboot()
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 -i start"));

    assert!(!dir.path().join("prusalink.pid").exists());
    assert_eq!(
        std::fs::read(dir.path().join("ttyFAKE")).unwrap(),
        b"M117 Starting PrusaLink\n"
    );
}

#[test]
fn test_boot_fails_when_service_cannot_exec() {
    let dir = tempfile::tempdir().unwrap();
    let Some(config) = host_config(dir.path(), "/nonexistent/prusalink", &["-i", "start"]) else {
        eprintln!("skipping: needs a non-root user with a passwd entry");
        return;
    };

    linkboot()
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("exec /nonexistent/prusalink"));
}
