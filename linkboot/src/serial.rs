//! Serial line to the printer.
//!
//! The printer resets when DTR drops, which happens on close while `HUPCL`
//! is set. Clearing it here means the printer only resets on reboot or
//! replug, not every time the service reopens the port.

use crate::constants::serial::DISPLAY_MESSAGE_GCODE;
use crate::errors::{BootResult, ConfigError, SystemError};
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Line settings applied to the serial device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialSettings {
    pub device: PathBuf,
    pub baud_rate: u32,
    /// Whether DTR drops when the last descriptor closes.
    pub hangup_on_close: bool,
}

/// Map a numeric baud rate to its termios constant.
pub fn baud_rate(rate: u32) -> BootResult<BaudRate> {
    let baud = match rate {
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        460800 => BaudRate::B460800,
        500000 => BaudRate::B500000,
        921600 => BaudRate::B921600,
        1000000 => BaudRate::B1000000,
        _ => return Err(ConfigError::UnsupportedBaudRate(rate).into()),
    };
    Ok(baud)
}

/// Open the device and apply `settings`.
pub fn configure_serial(settings: &SerialSettings) -> BootResult<()> {
    let baud = baud_rate(settings.baud_rate)?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(nix::libc::O_NOCTTY | nix::libc::O_NONBLOCK)
        .open(&settings.device)
        .map_err(|e| SystemError::serial(&settings.device, e))?;

    apply_line_settings(&file, baud, settings.hangup_on_close)
        .map_err(|e| SystemError::serial(&settings.device, e))?;

    tracing::info!(
        device = %settings.device.display(),
        baud_rate = settings.baud_rate,
        hangup_on_close = settings.hangup_on_close,
        "Serial line configured"
    );
    Ok(())
}

/// Set both speeds and the HUPCL flag on an open terminal.
///
/// Applied with `TCSAFLUSH` so pending input is discarded along with the
/// old settings.
pub fn apply_line_settings<Fd: AsFd>(
    fd: Fd,
    baud: BaudRate,
    hangup_on_close: bool,
) -> std::io::Result<()> {
    let mut attrs = termios::tcgetattr(fd.as_fd())?;
    tracing::debug!(?attrs, "Serial attributes before configuration");

    termios::cfsetspeed(&mut attrs, baud)?;
    attrs
        .control_flags
        .set(ControlFlags::HUPCL, hangup_on_close);

    termios::tcsetattr(fd.as_fd(), SetArg::TCSAFLUSH, &attrs)?;
    Ok(())
}

/// Text for the printer display, sent as one `M117` line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct StatusMessage(String);

impl From<String> for StatusMessage {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<StatusMessage> for String {
    fn from(message: StatusMessage) -> Self {
        message.0
    }
}

impl StatusMessage {
    /// Line breaks are folded to spaces so the firmware sees a single command.
    pub fn new(text: impl AsRef<str>) -> Self {
        let text = text
            .as_ref()
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect::<String>();
        Self(text.trim_end().to_string())
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    /// Wire form: `M117 <text>\n`.
    pub fn to_line(&self) -> Vec<u8> {
        format!("{self}\n").into_bytes()
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", DISPLAY_MESSAGE_GCODE, self.0)
    }
}

/// Write `bytes` to an existing device node.
///
/// The node is never created; a missing device is an error.
pub fn write_device(path: &Path, bytes: &[u8]) -> BootResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .custom_flags(nix::libc::O_NOCTTY)
        .open(path)
        .map_err(|e| SystemError::DeviceWrite {
            path: path.to_path_buf(),
            source: e,
        })?;

    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| SystemError::DeviceWrite {
            path: path.to_path_buf(),
            source: e,
        })?;

    tracing::debug!(path = %path.display(), len = bytes.len(), "Wrote to device");
    Ok(())
}
