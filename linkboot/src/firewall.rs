//! Port redirect rules.
//!
//! Each rule rewrites the destination port of matching TCP/UDP traffic in
//! the `nat` table. Rules are installed by invoking `iptables`, one call per
//! rule, in order.

use crate::constants::firewall::{
    HTTP_PORT, INBOUND_INTERFACES, LOOPBACK_INTERFACE, NAT_TABLE, SERVICE_PORT,
};
use crate::errors::{BootResult, ConfigError};
use crate::system::System;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Netfilter chain a rule is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Chain {
    /// Traffic arriving from the network.
    Prerouting,
    /// Traffic generated locally.
    Output,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Prerouting => "PREROUTING",
            Chain::Output => "OUTPUT",
        }
    }
}

/// Interface match of a rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceMatch {
    /// `-i <name>`
    In(String),
    /// `-o <name>`
    Out(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// How rules are added to the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    /// Append unconditionally. Repeated boots without a reboot duplicate rules.
    #[default]
    Append,
    /// Append only when `iptables -C` reports the rule missing.
    Ensure,
}

/// A destination-port redirect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub chain: Chain,
    pub interface: InterfaceMatch,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    pub dport: u16,
    pub to_port: u16,
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

impl RedirectRule {
    /// Redirect inbound traffic on `interface`.
    pub fn inbound(interface: impl Into<String>, dport: u16, to_port: u16) -> Self {
        Self {
            chain: Chain::Prerouting,
            interface: InterfaceMatch::In(interface.into()),
            protocol: Protocol::Tcp,
            dport,
            to_port,
        }
    }

    /// Redirect locally generated traffic leaving through `interface`.
    pub fn local(interface: impl Into<String>, dport: u16, to_port: u16) -> Self {
        Self {
            chain: Chain::Output,
            interface: InterfaceMatch::Out(interface.into()),
            protocol: Protocol::Tcp,
            dport,
            to_port,
        }
    }

    /// Check that iptables would accept the rule.
    ///
    /// PREROUTING only knows the input interface and OUTPUT only the output one.
    pub fn validate(&self) -> BootResult<()> {
        match (&self.chain, &self.interface) {
            (Chain::Prerouting, InterfaceMatch::Out(_)) => {
                return Err(ConfigError::InvalidRule(format!(
                    "{self}: PREROUTING cannot match an output interface"
                ))
                .into());
            }
            (Chain::Output, InterfaceMatch::In(_)) => {
                return Err(ConfigError::InvalidRule(format!(
                    "{self}: OUTPUT cannot match an input interface"
                ))
                .into());
            }
            _ => {}
        }

        let name = match &self.interface {
            InterfaceMatch::In(name) | InterfaceMatch::Out(name) => name,
        };
        if name.is_empty() {
            return Err(ConfigError::InvalidRule(format!("{self}: empty interface name")).into());
        }

        if self.dport == 0 || self.to_port == 0 {
            return Err(ConfigError::InvalidRule(format!("{self}: port 0")).into());
        }

        Ok(())
    }

    /// iptables arguments for `operation` (`-A` to append, `-C` to check).
    pub fn iptables_args(&self, operation: &str) -> Vec<String> {
        let (iface_flag, iface) = match &self.interface {
            InterfaceMatch::In(name) => ("-i", name),
            InterfaceMatch::Out(name) => ("-o", name),
        };

        vec![
            "-t".to_string(),
            NAT_TABLE.to_string(),
            operation.to_string(),
            self.chain.as_str().to_string(),
            iface_flag.to_string(),
            iface.clone(),
            "-p".to_string(),
            self.protocol.as_str().to_string(),
            "--dport".to_string(),
            self.dport.to_string(),
            "-j".to_string(),
            "REDIRECT".to_string(),
            "--to-port".to_string(),
            self.to_port.to_string(),
        ]
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = match &self.interface {
            InterfaceMatch::In(name) => format!("in {name}"),
            InterfaceMatch::Out(name) => format!("out {name}"),
        };
        write!(
            f,
            "{} {} {}/{} -> {}",
            self.chain.as_str(),
            iface,
            self.protocol.as_str(),
            self.dport,
            self.to_port
        )
    }
}

/// The stock rules: HTTP to the service port on every inbound interface,
/// plus loopback.
pub fn default_rules() -> Vec<RedirectRule> {
    INBOUND_INTERFACES
        .iter()
        .map(|iface| RedirectRule::inbound(*iface, HTTP_PORT, SERVICE_PORT))
        .chain(std::iter::once(RedirectRule::local(
            LOOPBACK_INTERFACE,
            HTTP_PORT,
            SERVICE_PORT,
        )))
        .collect()
}

/// Install every rule, continuing past failures.
///
/// Returns how many rules were added. If any rule failed, the first error is
/// returned after all rules have been attempted.
pub fn install_redirect_rules<S: System + ?Sized>(
    system: &S,
    iptables: &Path,
    rules: &[RedirectRule],
    mode: RuleMode,
) -> BootResult<usize> {
    let mut installed = 0;
    let mut first_error = None;

    for rule in rules {
        match install_rule(system, iptables, rule, mode) {
            Ok(true) => {
                tracing::info!(rule = %rule, "Redirect rule installed");
                installed += 1;
            }
            Ok(false) => {
                tracing::debug!(rule = %rule, "Redirect rule already present");
            }
            Err(e) => {
                tracing::warn!(rule = %rule, error = %e, "Failed to install redirect rule");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(installed),
    }
}

fn install_rule<S: System + ?Sized>(
    system: &S,
    iptables: &Path,
    rule: &RedirectRule,
    mode: RuleMode,
) -> BootResult<bool> {
    rule.validate()?;

    if mode == RuleMode::Ensure && system.run(iptables, &rule.iptables_args("-C")).is_ok() {
        return Ok(false);
    }

    system.run(iptables, &rule.iptables_args("-A"))?;
    Ok(true)
}
