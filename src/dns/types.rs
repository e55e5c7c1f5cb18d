use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::IPv4, AddressFamily::IPv6];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::IPv4 => "IPv4",
            AddressFamily::IPv6 => "IPv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum AdapterStatus {
    Up,
    Down,
    Disconnected,
    Other,
}

impl AdapterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterStatus::Up => "Up",
            AdapterStatus::Down => "Down",
            AdapterStatus::Disconnected => "Disconnected",
            AdapterStatus::Other => "Other",
        }
    }
}

impl fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One entry of an adapter inventory snapshot.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct AdapterDescriptor {
    pub name: String,
    pub status: AdapterStatus,
    /// False for virtual switches, VPN/TAP drivers and other software
    /// interfaces.
    pub physical: bool,
}

impl AdapterDescriptor {
    pub fn new(name: impl Into<String>, status: AdapterStatus) -> Self {
        Self {
            name: name.into(),
            status,
            physical: true,
        }
    }

    pub fn with_physical(mut self, physical: bool) -> Self {
        self.physical = physical;
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == AdapterStatus::Up
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default, Debug)]
pub struct DnsProfile {
    pub name: String,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
}

impl DnsProfile {
    pub fn new(name: impl Into<String>, ipv4: &[&str], ipv6: &[&str]) -> Self {
        Self {
            name: name.into(),
            ipv4: ipv4.iter().map(|a| a.to_string()).collect(),
            ipv6: ipv6.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn addresses(&self, family: AddressFamily) -> &[String] {
        match family {
            AddressFamily::IPv4 => &self.ipv4,
            AddressFamily::IPv6 => &self.ipv6,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }
}

/// What the caller wants done to the target adapters.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Intent {
    SetProfile(DnsProfile),
    Revert,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum Action {
    SetStatic,
    Revert,
}

/// An OS-neutral description of one per-adapter, per-family change.
#[derive(Clone, PartialEq, Eq, Serialize, Debug)]
pub struct CommandSpec {
    pub adapter: String,
    pub family: AddressFamily,
    pub action: Action,
    /// Resolver addresses in priority order; empty for `Action::Revert`.
    pub addresses: Vec<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub adapter_name: String,
    pub family: AddressFamily,
    pub action: Action,
    pub succeeded: bool,
    pub raw_output: String,
    /// Set on the steps of the netsh retry that follows a failed
    /// PowerShell set.
    pub fallback: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Debug)]
pub enum Outcome {
    Full,
    Partial,
    Failed,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Full => "Full",
            Outcome::Partial => "Partial",
            Outcome::Failed => "Failed",
            Outcome::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AdapterReport {
    pub adapter_name: String,
    pub outcome: Outcome,
    /// Why the adapter was skipped or rejected before any command ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub details: Vec<CommandResult>,
}

impl AdapterReport {
    pub fn skipped(adapter_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            outcome: Outcome::Skipped,
            reason: Some(reason.into()),
            details: Vec::new(),
        }
    }

    pub fn rejected(adapter_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            outcome: Outcome::Failed,
            reason: Some(reason.into()),
            details: Vec::new(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Default, Debug)]
pub struct Report {
    pub adapters: Vec<AdapterReport>,
}

impl Report {
    #[allow(dead_code)]
    pub fn find(&self, adapter_name: &str) -> Option<&AdapterReport> {
        self.adapters.iter().find(|a| a.adapter_name == adapter_name)
    }

    /// True when nothing ended up Partial or Failed.
    pub fn is_success(&self) -> bool {
        self.adapters
            .iter()
            .all(|a| matches!(a.outcome, Outcome::Full | Outcome::Skipped))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CurrentDnsState {
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
}

impl CurrentDnsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_display(&self, family: AddressFamily) -> String {
        let addresses = match family {
            AddressFamily::IPv4 => &self.ipv4,
            AddressFamily::IPv6 => &self.ipv6,
        };

        if addresses.is_empty() {
            "Automatic".to_string()
        } else {
            addresses.join(", ")
        }
    }
}
