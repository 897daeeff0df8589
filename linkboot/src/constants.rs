//! Default values for the printer host.
//!
//! These reproduce the stock image: a Raspberry Pi wired to the printer's
//! UART, serving PrusaLink on 8080 behind a port 80 redirect.

/// Packet redirect defaults
pub mod firewall {
    /// iptables binary, looked up in PATH
    pub const IPTABLES: &str = "iptables";

    /// Table holding the redirect rules
    pub const NAT_TABLE: &str = "nat";

    /// Port clients connect to
    pub const HTTP_PORT: u16 = 80;

    /// Port the service listens on
    pub const SERVICE_PORT: u16 = 8080;

    /// Interfaces receiving inbound HTTP
    pub const INBOUND_INTERFACES: &[&str] = &["wlan0", "eth0"];

    /// Interface for self-addressed traffic
    pub const LOOPBACK_INTERFACE: &str = "lo";
}

/// Serial line to the printer
pub mod serial {
    /// UART device on the Pi header
    pub const DEVICE: &str = "/dev/ttyAMA0";

    /// Line speed expected by the printer firmware
    pub const BAUD_RATE: u32 = 115200;

    /// G-code that shows text on the printer display
    pub const DISPLAY_MESSAGE_GCODE: &str = "M117";

    /// Text shown while the service starts
    pub const STATUS_TEXT: &str = "Starting PrusaLink";
}

/// Service launch defaults
///
/// Relative paths resolve against the service user's home directory.
pub mod service {
    /// Numeric id of the unprivileged service user
    pub const UID: u32 = 1000;

    /// Helper run once before the service starts
    pub const PREBOOT_HOOK: &str = ".local/bin/prusalink-boot";

    /// PID file left behind by a previous run
    pub const PID_FILE: &str = "prusalink.pid";

    /// Service executable
    pub const PROGRAM: &str = ".local/bin/prusalink";

    /// Service arguments
    pub const ARGS: &[&str] = &["-i", "start"];

    /// Interpreter optimization level passed to the service
    pub const PYTHONOPTIMIZE: &str = "2";
}
