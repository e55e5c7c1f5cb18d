use crate::dns::types::AddressFamily;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Longest interface alias Windows accepts.
const MAX_ADAPTER_NAME_LEN: usize = 256;

/// Characters with meaning to a shell or to PowerShell string expansion.
/// Adapter names containing them are refused. Wildcard characters are
/// allowed; Windows names its Wi-Fi Direct adapters `Local Area Connection* N`.
const FORBIDDEN_NAME_CHARS: &[char] = &[
    '"', '\'', '`', '$', '&', '|', ';', '<', '>', '^', '%', '!', '{', '}',
];

pub fn validate_ipv4(addr: &str) -> bool {
    addr.trim().parse::<Ipv4Addr>().is_ok()
}

pub fn validate_ipv6(addr: &str) -> bool {
    addr.trim().parse::<Ipv6Addr>().is_ok()
}

pub fn validate_address(family: AddressFamily, addr: &str) -> bool {
    match family {
        AddressFamily::IPv4 => validate_ipv4(addr),
        AddressFamily::IPv6 => validate_ipv6(addr),
    }
}

/// Checks that an adapter name can be embedded in a command argument.
/// Returns the reason on rejection.
pub fn validate_adapter_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name is empty".to_string());
    }
    if name.len() > MAX_ADAPTER_NAME_LEN {
        return Err(format!("name exceeds {} bytes", MAX_ADAPTER_NAME_LEN));
    }
    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(format!("name contains control character {:?}", c));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(format!("name contains forbidden character '{}'", c));
    }
    Ok(())
}
