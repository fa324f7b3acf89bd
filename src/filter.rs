//! Signature matching for decoded advertising reports.

use crate::decoder::{AdvertisingReport, EventKind};
use crate::mac_address::MacAddress;
use std::time::SystemTime;
use thiserror::Error;

/// Signature broadcast by the soil moisture sensor firmware.
pub const DEFAULT_SIGNATURE: &str = "MSOT_BLE_Demo:";

/// Byte pattern identifying the expected device family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSignature(Vec<u8>);

impl Default for DeviceSignature {
    fn default() -> Self {
        Self(DEFAULT_SIGNATURE.as_bytes().to_vec())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("device signature must not be empty")]
pub struct EmptySignature;

impl DeviceSignature {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, EmptySignature> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(EmptySignature);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::str::FromStr for DeviceSignature {
    type Err = EmptySignature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.as_bytes())
    }
}

/// A reading from a recognised device, ready to be formatted.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    pub address: MacAddress,
    /// Payload window with trailing NUL and whitespace padding removed.
    pub payload: Vec<u8>,
    pub timestamp: SystemTime,
}

impl SensorEvent {
    /// The payload as text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// The payload parsed as a decimal number.
    pub fn value(&self) -> Option<f64> {
        self.payload_str()?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

fn trim_padding(payload: &[u8]) -> &[u8] {
    let end = payload
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &payload[..end]
}

/// Accepts reports whose signature window equals the configured signature.
#[derive(Debug, Clone)]
pub struct ReportFilter {
    signature: DeviceSignature,
}

impl ReportFilter {
    pub fn new(signature: DeviceSignature) -> Self {
        Self { signature }
    }

    pub fn signature(&self) -> &DeviceSignature {
        &self.signature
    }

    pub fn matches(&self, report: &AdvertisingReport) -> Option<SensorEvent> {
        if report.event_kind != EventKind::AdvertisingReport
            || !report.matches_signature(self.signature.as_bytes())
        {
            return None;
        }

        Some(SensorEvent {
            address: report.address,
            payload: trim_padding(&report.payload).to_vec(),
            timestamp: SystemTime::now(),
        })
    }
}
