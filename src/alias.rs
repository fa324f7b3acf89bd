//! Human-readable display names for sensor addresses.
//!
//! The gateway charts every device under its display name; aliases let a
//! single agent serving several broadcasters label each one separately.

use crate::mac_address::MacAddress;
use std::collections::BTreeMap;

/// Address-to-name lookup.
pub type AliasMap = BTreeMap<MacAddress, String>;

/// A parsed alias mapping a device address to a display name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub address: MacAddress,
    pub name: String,
}

/// Parse an alias in the format `ADDRESS=NAME`.
///
/// # Example
/// ```
/// use hci_sensor_agent::alias::parse_alias;
///
/// let alias = parse_alias("aabbccddeeff=Greenhouse").unwrap();
/// assert_eq!(alias.address.to_string(), "aabbccddeeff");
/// assert_eq!(alias.name, "Greenhouse");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format ADDRESS=NAME".to_string())?;
    let address = address.parse::<MacAddress>().map_err(|e| e.to_string())?;
    if name.is_empty() {
        return Err("invalid alias: name must not be empty".into());
    }
    Ok(Alias {
        address,
        name: name.into(),
    })
}

pub fn to_map(aliases: &[Alias]) -> AliasMap {
    aliases
        .iter()
        .map(|a| (a.address, a.name.clone()))
        .collect()
}

/// The alias for `address`, or `default` when none is configured.
pub fn resolve_name<'a>(address: &MacAddress, aliases: &'a AliasMap, default: &'a str) -> &'a str {
    aliases.get(address).map_or(default, String::as_str)
}
