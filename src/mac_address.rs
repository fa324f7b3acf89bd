//! Compact device address type for Bluetooth broadcasters.
//!
//! HCI transmits addresses least-significant byte first. [`MacAddress`] always
//! stores the canonical (display) order; use [`MacAddress::from_wire`] when
//! lifting bytes straight out of a frame.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth device address stored as a 6-byte array in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Build an address from the little-endian byte order used on the HCI wire.
    pub fn from_wire(wire: [u8; 6]) -> Self {
        let mut bytes = wire;
        bytes.reverse();
        Self(bytes)
    }

    /// Bytes in HCI wire order.
    pub fn to_wire(self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

/// Renders the canonical 12 lowercase hex characters, e.g. `aabbccddeeff`.
impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Errors returned when parsing an address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid address: expected 12 hex digits or 6 parts, got {0:?}")]
    InvalidLength(String),
    #[error("invalid address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Accepts `aabbccddeeff` as well as `AA:BB:CC:DD:EE:FF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut bytes = [0u8; 6];

        if s.contains(':') {
            let parts: Vec<&str> = s.split(':').collect();
            if parts.len() != 6 {
                return Err(ParseMacError::InvalidLength(s.to_string()));
            }
            for (i, part) in parts.iter().enumerate() {
                if part.len() != 2 {
                    return Err(ParseMacError::InvalidPartLength(i));
                }
                bytes[i] = parse_hex_byte(part)?;
            }
            return Ok(MacAddress(bytes));
        }

        if s.len() != 12 || !s.is_ascii() {
            return Err(ParseMacError::InvalidLength(s.to_string()));
        }
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = parse_hex_byte(&s[i * 2..i * 2 + 2])?;
        }
        Ok(MacAddress(bytes))
    }
}

fn parse_hex_byte(part: &str) -> Result<u8, ParseMacError> {
    u8::from_str_radix(part, 16).map_err(|_| ParseMacError::InvalidHex(part.to_string()))
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}
