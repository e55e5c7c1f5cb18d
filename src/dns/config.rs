use crate::dns::types::{AddressFamily, DnsProfile};
use crate::dns::validation::validate_address;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Profile file must contain a JSON object at the top level")]
    NotAnObject,
    #[error("Config directory not found")]
    ConfigDirNotFound,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const PROFILE_FILE_NAME: &str = "dns_profiles.json";
const APP_DIR_NAME: &str = "dns-switcher";

const SAMPLE_PROFILES: &str = r#"{
  // Entries here replace built-in profiles with the same name.
  "MyOffice": {
    "ipv4": ["10.0.0.53", "10.0.0.54"],
    "ipv6": []
  }
}
"#;

/// The profiles every installation starts with.
pub fn builtin_profiles() -> Vec<DnsProfile> {
    vec![
        DnsProfile::new(
            "Cloudflare",
            &["1.1.1.1", "1.0.0.1"],
            &["2606:4700:4700::1111", "2606:4700:4700::1001"],
        ),
        DnsProfile::new(
            "Google",
            &["8.8.8.8", "8.8.4.4"],
            &["2001:4860:4860::8888", "2001:4860:4860::8844"],
        ),
    ]
}

/// An ordered profile table with case-insensitive lookup.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProfileSet {
    profiles: Vec<DnsProfile>,
}

impl ProfileSet {
    pub fn builtin() -> Self {
        Self {
            profiles: builtin_profiles(),
        }
    }

    /// Built-ins with `overrides` applied as whole-record replacements.
    /// Returns a fresh table; `base` is left as it was.
    pub fn merged(base: &[DnsProfile], overrides: Vec<DnsProfile>) -> Self {
        let mut profiles = base.to_vec();
        for profile in overrides {
            match profiles
                .iter()
                .position(|p| p.name.eq_ignore_ascii_case(&profile.name))
            {
                Some(index) => profiles[index] = profile,
                None => profiles.push(profile),
            }
        }
        Self { profiles }
    }

    pub fn get(&self, name: &str) -> Option<&DnsProfile> {
        let name = name.trim();
        self.profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DnsProfile> {
        self.profiles.iter()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }
}

#[derive(Deserialize, Debug)]
struct ProfileEntry {
    #[serde(default)]
    ipv4: Option<Vec<String>>,
    #[serde(default)]
    ipv6: Option<Vec<String>>,
}

fn clean_addresses(
    name: &str,
    family: AddressFamily,
    addresses: Option<Vec<String>>,
) -> std::result::Result<Vec<String>, String> {
    let addresses: Vec<String> = addresses
        .unwrap_or_default()
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    if let Some(bad) = addresses.iter().find(|a| !validate_address(family, a)) {
        return Err(format!(
            "profile '{}' has invalid {} address '{}'",
            name, family, bad
        ));
    }
    Ok(addresses)
}

/// Parses the override file contents. Comments are allowed. Entries with
/// the wrong shape or an invalid address are skipped with a warning; the
/// rest are returned in file order.
pub fn parse_overrides(content: &str) -> Result<Vec<DnsProfile>> {
    let stripped = json_comments::StripComments::new(content.as_bytes());
    let json_value: serde_json::Value = serde_json::from_reader(stripped)?;

    let serde_json::Value::Object(entries) = json_value else {
        return Err(ConfigError::NotAnObject);
    };

    let mut profiles = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        let entry: ProfileEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping malformed profile '{}': {}", name, e);
                continue;
            }
        };

        let ipv4 = clean_addresses(&name, AddressFamily::IPv4, entry.ipv4);
        let ipv6 = clean_addresses(&name, AddressFamily::IPv6, entry.ipv6);
        match (ipv4, ipv6) {
            (Ok(ipv4), Ok(ipv6)) => profiles.push(DnsProfile { name, ipv4, ipv6 }),
            (Err(e), _) | (_, Err(e)) => warn!("Skipping profile: {}", e),
        }
    }

    Ok(profiles)
}

pub fn load_overrides(path: &Path) -> Result<Vec<DnsProfile>> {
    if !path.exists() {
        debug!(path = %path.display(), "no profile override file");
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    parse_overrides(&content)
}

/// Loads the built-ins merged with the override file at `path`.
pub fn load_profiles(path: &Path) -> Result<ProfileSet> {
    let overrides = load_overrides(path)?;
    Ok(ProfileSet::merged(&builtin_profiles(), overrides))
}

/// Where the override file lives when no path is given: next to the
/// executable if a file is already there, otherwise the user config dir.
pub fn get_profiles_path() -> Result<PathBuf> {
    if let Some(beside_exe) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(PROFILE_FILE_NAME)))
        && beside_exe.exists()
    {
        return Ok(beside_exe);
    }

    let config_dir = dirs::config_dir()
        .or_else(dirs::data_local_dir)
        .ok_or(ConfigError::ConfigDirNotFound)?;

    Ok(config_dir.join(APP_DIR_NAME).join(PROFILE_FILE_NAME))
}

/// Writes a sample override file unless one already exists.
/// Returns whether a file was written.
pub fn write_sample_profiles(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, SAMPLE_PROFILES)?;
    Ok(true)
}
