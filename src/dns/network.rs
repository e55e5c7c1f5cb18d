use crate::dns::runner::{CommandRunner, ConsoleEncoding, Invocation};
use crate::dns::types::{AdapterDescriptor, AdapterStatus};
use crate::dns::validation::validate_adapter_name;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Adapter inventory unavailable: {0}")]
    InventoryUnavailable(String),
}

pub type Result<T> = std::result::Result<T, NetworkError>;

const UP_TOKENS: &[&str] = &["up", "connected", "verbunden", "connecté", "conectado", "connesso"];
const DISCONNECTED_TOKENS: &[&str] = &[
    "disconnected",
    "getrennt",
    "déconnecté",
    "desconectado",
    "disconnesso",
    "media disconnected",
];
const DOWN_TOKENS: &[&str] = &["down", "disabled", "not present", "deaktiviert", "désactivé"];
/// netsh interface types that stand for a hardware NIC.
const DEDICATED_TOKENS: &[&str] = &["dedicated", "dediziert", "dédié", "dedicado", "dedicato"];

fn inventory_powershell() -> Invocation {
    Invocation::new(
        "powershell.exe",
        [
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; \
             Get-NetAdapter | Select-Object Name, Status, Virtual, HardwareInterface \
             | ConvertTo-Json -Compress",
        ],
    )
}

fn inventory_netsh() -> Invocation {
    Invocation::new("netsh", ["interface", "show", "interface"]).with_encoding(ConsoleEncoding::Oem)
}

/// Maps a status word from either inventory source onto the known set.
pub fn normalize_status(raw: &str) -> AdapterStatus {
    let token = raw.trim().to_lowercase();
    if UP_TOKENS.contains(&token.as_str()) {
        AdapterStatus::Up
    } else if DISCONNECTED_TOKENS.contains(&token.as_str()) {
        AdapterStatus::Disconnected
    } else if DOWN_TOKENS.contains(&token.as_str()) {
        AdapterStatus::Down
    } else {
        AdapterStatus::Other
    }
}

/// Parses `Get-NetAdapter | ConvertTo-Json` output. PowerShell emits a bare
/// object for a single adapter and an array otherwise. An adapter counts as
/// physical unless it reports `Virtual` or lacks `HardwareInterface`; either
/// field missing leaves that side of the check passing.
pub fn parse_netadapter_json(
    output: &str,
) -> std::result::Result<Vec<AdapterDescriptor>, serde_json::Error> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }

    let json_value: serde_json::Value = serde_json::from_str(trimmed)?;
    let entries = match json_value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    let adapters = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("Name").and_then(|v| v.as_str())?;
            let status = match entry.get("Status") {
                Some(serde_json::Value::String(s)) => normalize_status(s),
                _ => AdapterStatus::Other,
            };
            let is_virtual = entry
                .get("Virtual")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let hardware = entry
                .get("HardwareInterface")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            Some(AdapterDescriptor::new(name, status).with_physical(!is_virtual && hardware))
        })
        .collect();

    Ok(adapters)
}

/// Splits off `count` whitespace-separated tokens and returns them along
/// with the untouched remainder of the line.
fn split_leading_tokens(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut tokens = Vec::with_capacity(count);
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        tokens.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((tokens, rest.trim_end()))
}

/// Parses the `netsh interface show interface` table:
///
/// ```text
/// Admin State    State          Type             Interface Name
/// -------------------------------------------------------------------------
/// Enabled        Connected      Dedicated        Ethernet
/// ```
///
/// Rows before the dashed separator are ignored so the localized header
/// text never matters. Only `Dedicated` interfaces count as physical. Status words that span two tokens in some locales
/// are not supported and fall through to `Other`.
pub fn parse_netsh_interfaces(output: &str) -> Vec<AdapterDescriptor> {
    let mut adapters = Vec::new();
    let mut in_body = false;

    for line in output.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        if line.trim_start().starts_with("---") {
            in_body = true;
            continue;
        }
        if !in_body {
            continue;
        }

        let Some((tokens, name)) = split_leading_tokens(line, 3) else {
            debug!(line, "skipping unparseable interface row");
            continue;
        };
        if name.is_empty() {
            continue;
        }

        let status = if normalize_status(tokens[0]) == AdapterStatus::Down {
            AdapterStatus::Down
        } else {
            normalize_status(tokens[1])
        };
        let physical = DEDICATED_TOKENS.contains(&tokens[2].to_lowercase().as_str());
        adapters.push(AdapterDescriptor::new(name, status).with_physical(physical));
    }

    adapters
}

fn dedup_by_name(adapters: Vec<AdapterDescriptor>) -> Vec<AdapterDescriptor> {
    let mut seen = HashSet::new();
    adapters
        .into_iter()
        .filter(|a| seen.insert(a.name.clone()))
        .collect()
}

/// Queries the OS for its network adapters. Tries PowerShell first and
/// falls back to `netsh` when PowerShell is missing or misbehaves.
pub async fn list_adapters(runner: &impl CommandRunner) -> Result<Vec<AdapterDescriptor>> {
    match runner.run(&inventory_powershell()).await {
        Ok(output) if output.success() => match parse_netadapter_json(&output.stdout) {
            Ok(adapters) => return Ok(dedup_by_name(adapters)),
            Err(e) => warn!("Get-NetAdapter returned unreadable output: {}", e),
        },
        Ok(output) => warn!(
            "Get-NetAdapter failed with status {:?}: {}",
            output.code,
            output.combined()
        ),
        Err(e) => warn!("Could not run PowerShell for adapter inventory: {}", e),
    }

    let output = runner
        .run(&inventory_netsh())
        .await
        .map_err(|e| NetworkError::InventoryUnavailable(format!("failed to run netsh: {}", e)))?;

    if !output.success() {
        return Err(NetworkError::InventoryUnavailable(format!(
            "netsh exited with status {:?}: {}",
            output.code,
            output.combined()
        )));
    }

    Ok(dedup_by_name(parse_netsh_interfaces(&output.stdout)))
}

/// Result of narrowing an inventory snapshot down to the adapters a
/// command batch should touch.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TargetSelection {
    pub targets: Vec<String>,
    /// Adapters left out, with the reason.
    pub skipped: Vec<(String, String)>,
}

/// "Apply to all active adapters": every Up physical adapter in inventory
/// order. Virtual switches, VPN and TAP adapters are only changed when
/// named explicitly.
pub fn select_all_up(inventory: &[AdapterDescriptor]) -> TargetSelection {
    let mut selection = TargetSelection::default();
    for adapter in inventory {
        if !adapter.is_up() {
            debug!(adapter = %adapter.name, status = %adapter.status, "ignoring inactive adapter");
        } else if !adapter.physical {
            debug!(adapter = %adapter.name, "ignoring virtual adapter");
        } else {
            selection.targets.push(adapter.name.clone());
        }
    }
    selection
}

/// "Apply to selected": the requested names intersected with the Up
/// adapters, in the order requested. Names that are not Up or not present
/// are reported as skipped. A name that could never be a valid adapter is
/// kept as a target so the command generator rejects it for that adapter.
pub fn select_named(inventory: &[AdapterDescriptor], requested: &[String]) -> TargetSelection {
    let mut selection = TargetSelection::default();
    let mut seen = HashSet::new();

    for name in requested {
        if !seen.insert(name.as_str()) {
            continue;
        }
        match inventory.iter().find(|a| &a.name == name) {
            Some(adapter) if adapter.is_up() => selection.targets.push(name.clone()),
            Some(adapter) => selection
                .skipped
                .push((name.clone(), format!("not up ({})", adapter.status))),
            None if validate_adapter_name(name).is_err() => {
                selection.targets.push(name.clone())
            }
            None => selection.skipped.push((name.clone(), "not found".to_string())),
        }
    }

    selection
}
