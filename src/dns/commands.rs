use crate::dns::runner::{CommandRunner, ConsoleEncoding, Invocation};
use crate::dns::types::{Action, AddressFamily, CommandSpec, CurrentDnsState, Intent};
use crate::dns::validation::validate_adapter_name;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DnsCommandError {
    #[error("Invalid adapter name {name:?}: {reason}")]
    InvalidAdapterName { name: String, reason: String },
    #[error("PowerShell command failed: {0}")]
    CommandFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid output format")]
    InvalidOutput,
}

pub type Result<T> = std::result::Result<T, DnsCommandError>;

const AF_INET: u64 = 2;
const AF_INET6: u64 = 23;

pub(crate) fn escape_powershell_string(s: &str) -> String {
    s.replace('`', "``")
        .replace("'", "''")
        .replace(['\n', '\r'], "")
}

pub(crate) fn normalize_error_message(msg: &str) -> String {
    msg.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A single-quoted `-InterfaceAlias` literal. The parameter takes wildcard
/// patterns, so `*`, `?`, `[` and `]` are escaped to match literally.
fn interface_alias(name: &str) -> String {
    let mut alias = String::with_capacity(name.len());
    for c in escape_powershell_string(name).chars() {
        if matches!(c, '*' | '?' | '[' | ']') {
            alias.push('`');
        }
        alias.push(c);
    }
    format!("'{}'", alias)
}

fn powershell(script: &str) -> Invocation {
    let script_with_setup = format!(
        "[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; $ErrorActionPreference = 'Stop'; {}",
        script
    );
    Invocation::new(
        "powershell.exe",
        ["-NoProfile", "-NonInteractive", "-Command", script_with_setup.as_str()],
    )
}

fn netsh<I, S>(args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Invocation::new("netsh", args).with_encoding(ConsoleEncoding::Oem)
}

fn family_context(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::IPv4 => "ipv4",
        AddressFamily::IPv6 => "ipv6",
    }
}

fn checked_name(name: &str) -> Result<()> {
    validate_adapter_name(name).map_err(|reason| DnsCommandError::InvalidAdapterName {
        name: name.to_string(),
        reason,
    })
}

/// Commands for a single adapter, IPv4 before IPv6. A family with no
/// addresses in the profile gets no command and keeps its current setup.
pub fn build_adapter_commands(adapter: &str, intent: &Intent) -> Result<Vec<CommandSpec>> {
    checked_name(adapter)?;

    let specs = match intent {
        Intent::SetProfile(profile) => AddressFamily::ALL
            .iter()
            .filter(|family| !profile.addresses(**family).is_empty())
            .map(|family| CommandSpec {
                adapter: adapter.to_string(),
                family: *family,
                action: Action::SetStatic,
                addresses: profile.addresses(*family).to_vec(),
            })
            .collect(),
        Intent::Revert => AddressFamily::ALL
            .iter()
            .map(|family| CommandSpec {
                adapter: adapter.to_string(),
                family: *family,
                action: Action::Revert,
                addresses: Vec::new(),
            })
            .collect(),
    };

    Ok(specs)
}

/// Commands for a batch of adapters, grouped by adapter in the given
/// order. Any invalid name fails the whole call; use
/// [`build_adapter_commands`] to handle adapters independently.
#[allow(dead_code)]
pub fn build_commands(adapters: &[String], intent: &Intent) -> Result<Vec<CommandSpec>> {
    let mut specs = Vec::new();
    for adapter in adapters {
        specs.extend(build_adapter_commands(adapter, intent)?);
    }
    Ok(specs)
}

/// Binds an OS-neutral command to the Windows utility that performs it.
///
/// Static resolvers go through `Set-DnsClientServerAddress`, which only
/// touches the families present in `-ServerAddresses` and keeps the list
/// order as resolver priority. `netsh` handles the per-family DHCP revert.
pub fn render(spec: &CommandSpec) -> Invocation {
    match spec.action {
        Action::SetStatic => {
            let addr_list = spec
                .addresses
                .iter()
                .map(|a| format!("'{}'", escape_powershell_string(a)))
                .collect::<Vec<_>>()
                .join(",");
            powershell(&format!(
                "Set-DnsClientServerAddress -InterfaceAlias {} -ServerAddresses @({})",
                interface_alias(&spec.adapter),
                addr_list
            ))
        }
        Action::Revert => netsh([
            "interface".to_string(),
            family_context(spec.family).to_string(),
            "set".to_string(),
            "dnsservers".to_string(),
            format!("name={}", spec.adapter),
            "source=dhcp".to_string(),
        ]),
    }
}

/// The `netsh` sequence retried when the PowerShell set fails: clear the
/// list, set the primary, then add the rest at increasing indexes. Only
/// IPv4 static sets have one; everything else yields an empty sequence.
pub fn render_fallback(spec: &CommandSpec) -> Vec<Invocation> {
    if spec.action != Action::SetStatic || spec.family != AddressFamily::IPv4 {
        return Vec::new();
    }
    let Some((primary, rest)) = spec.addresses.split_first() else {
        return Vec::new();
    };

    let name = format!("name={}", spec.adapter);
    let mut steps = vec![
        netsh([
            "interface",
            "ipv4",
            "set",
            "dnsservers",
            name.as_str(),
            "source=dhcp",
        ]),
        netsh([
            "interface",
            "ipv4",
            "set",
            "dnsservers",
            name.as_str(),
            "static",
            primary.as_str(),
            "primary",
        ]),
    ];
    for (index, address) in rest.iter().enumerate() {
        steps.push(netsh([
            "interface".to_string(),
            "ipv4".to_string(),
            "add".to_string(),
            "dnsservers".to_string(),
            name.clone(),
            address.clone(),
            format!("index={}", index + 2),
        ]));
    }
    steps
}

pub fn clear_dns_cache_invocation() -> Invocation {
    powershell("Clear-DnsClientCache")
}

pub async fn clear_dns_cache(runner: &impl CommandRunner) -> Result<()> {
    let output = runner.run(&clear_dns_cache_invocation()).await?;
    if !output.success() {
        return Err(DnsCommandError::CommandFailed(normalize_error_message(
            &output.stderr,
        )));
    }
    Ok(())
}

/// Parses `Get-DnsClientServerAddress | ConvertTo-Json` output.
pub fn parse_current_dns(output: &str) -> Result<CurrentDnsState> {
    let mut state = CurrentDnsState::new();

    if output.trim().is_empty() || output.trim() == "null" {
        return Ok(state);
    }

    let json_value: serde_json::Value =
        serde_json::from_str(output.trim()).map_err(|_| DnsCommandError::InvalidOutput)?;

    let entries = match json_value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    for entry in entries {
        if let Some(family) = entry.get("AddressFamily").and_then(|v| v.as_u64())
            && let Some(addresses) = entry.get("ServerAddresses").and_then(|v| v.as_array())
        {
            let addr_list: Vec<String> = addresses
                .iter()
                .filter_map(|a| a.as_str().map(|s| s.to_string()))
                .collect();

            match family {
                AF_INET => state.ipv4 = addr_list,
                AF_INET6 => state.ipv6 = addr_list,
                _ => {}
            }
        }
    }

    Ok(state)
}

/// Reads the resolvers currently configured on an adapter.
pub async fn get_current_dns(
    runner: &impl CommandRunner,
    adapter: &str,
) -> Result<CurrentDnsState> {
    checked_name(adapter)?;

    let script = format!(
        "Get-DnsClientServerAddress -InterfaceAlias {} | ConvertTo-Json -Compress",
        interface_alias(adapter)
    );
    let output = runner.run(&powershell(&script)).await?;

    if !output.success() {
        return Err(DnsCommandError::CommandFailed(normalize_error_message(
            &output.stderr,
        )));
    }

    parse_current_dns(&output.stdout)
}
