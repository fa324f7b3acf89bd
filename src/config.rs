//! Command-line options and the validated agent configuration.

use crate::alias::{Alias, AliasMap};
use crate::decoder::{LayoutError, ReportLayout};
use crate::delivery::RetryPolicy;
use crate::filter::{DEFAULT_SIGNATURE, DeviceSignature, EmptySignature};
use crate::output::json::GatewayMetadata;
use clap::Parser;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_EXCEPTION_THRESHOLD: u32 = 3;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Forward BLE sensor broadcasts from a local HCI controller to a TCP gateway.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Gateway address to deliver readings to.
    #[arg(long, default_value = "127.0.0.1:5002", value_name = "HOST:PORT")]
    pub gateway: String,

    /// HCI controller index (0 for hci0).
    #[arg(long, default_value_t = 0)]
    pub device: u16,

    /// Signature identifying the sensor family in advertising data.
    #[arg(long, default_value = DEFAULT_SIGNATURE)]
    pub signature: String,

    /// Offset of the signature window from the report base.
    #[arg(long, default_value_t = 12)]
    pub signature_offset: usize,

    /// Offset of the payload window from the report base.
    #[arg(long, default_value_t = 26)]
    pub payload_offset: usize,

    /// Length of the payload window.
    #[arg(long, default_value_t = 10)]
    pub payload_len: usize,

    /// Pause between gateway connection attempts.
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub connect_retry_interval: Duration,

    /// Upper bound on a single gateway connection attempt.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub connect_timeout: Duration,

    /// Consecutive failures tolerated before the gateway connection is reset.
    #[arg(long, default_value_t = DEFAULT_EXCEPTION_THRESHOLD)]
    pub exception_threshold: u32,

    /// How long one controller read may block before the loop polls again.
    #[arg(long, default_value = "100ms", value_parser = parse_duration)]
    pub read_timeout: Duration,

    /// Deliver at most one reading per device per interval (0 disables).
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub send_interval: Duration,

    /// Specify human-readable alias for a sensor address.
    /// Format: --alias aabbccddeeff=Greenhouse
    #[arg(long = "alias", value_parser = crate::alias::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// GUID template; the last 12 characters are replaced by the device address.
    #[arg(long, default_value = "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx")]
    pub guid: String,

    #[arg(long, default_value = "Your organization")]
    pub organization: String,

    /// Display name for devices without an alias.
    #[arg(long, default_value = "Sensor display name")]
    pub display_name: String,

    #[arg(long, default_value = "vol/vol")]
    pub unit_of_measure: String,

    #[arg(long, default_value = "WaterContent")]
    pub measure_name: String,

    #[arg(long, default_value = "Sensor location")]
    pub location: String,

    /// Verbose output, log frame-level detail
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid report layout: {0}")]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Signature(#[from] EmptySignature),
    #[error("read timeout must be greater than zero")]
    ZeroReadTimeout,
}

/// Everything the agent needs, validated.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub gateway: String,
    pub device: u16,
    pub layout: ReportLayout,
    pub signature: DeviceSignature,
    pub retry: RetryPolicy,
    pub exception_threshold: u32,
    pub read_timeout: Duration,
    pub send_interval: Duration,
    pub aliases: AliasMap,
    pub metadata: GatewayMetadata,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gateway: "127.0.0.1:5002".into(),
            device: 0,
            layout: ReportLayout::default(),
            signature: DeviceSignature::default(),
            retry: RetryPolicy::default(),
            exception_threshold: DEFAULT_EXCEPTION_THRESHOLD,
            read_timeout: DEFAULT_READ_TIMEOUT,
            send_interval: DEFAULT_SEND_INTERVAL,
            aliases: AliasMap::new(),
            metadata: GatewayMetadata::default(),
        }
    }
}

impl TryFrom<&Options> for AgentConfig {
    type Error = ConfigError;

    fn try_from(options: &Options) -> Result<Self, ConfigError> {
        let signature: DeviceSignature = options.signature.parse()?;
        let layout = ReportLayout::new(
            options.signature_offset,
            signature.len(),
            options.payload_offset,
            options.payload_len,
        )?;
        if options.read_timeout.is_zero() {
            return Err(ConfigError::ZeroReadTimeout);
        }

        Ok(Self {
            gateway: options.gateway.clone(),
            device: options.device,
            layout,
            signature,
            retry: RetryPolicy {
                retry_interval: options.connect_retry_interval,
                connect_timeout: options.connect_timeout,
            },
            exception_threshold: options.exception_threshold,
            read_timeout: options.read_timeout,
            send_interval: options.send_interval,
            aliases: crate::alias::to_map(&options.aliases),
            metadata: GatewayMetadata {
                guid: options.guid.clone(),
                organization: options.organization.clone(),
                display_name: options.display_name.clone(),
                unit_of_measure: options.unit_of_measure.clone(),
                measure_name: options.measure_name.clone(),
                location: options.location.clone(),
            },
        })
    }
}

fn parse_seconds(num: &str, src: &str) -> Result<Duration, String> {
    let num = num.trim();
    if let Ok(secs) = num.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    num.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| format!("invalid duration: {}", src))
}

/// Parse a human-readable duration string.
///
/// Supports formats like "3s", "1m", "500ms", "2h". A value without suffix
/// is interpreted as seconds and may be fractional ("0.1").
///
/// # Example
/// ```
/// use hci_sensor_agent::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("0.1").unwrap(), Duration::from_millis(100));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    if let Some(num) = src.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {}", num))?;
        return Ok(Duration::from_millis(millis));
    }

    if let Some(num) = src.strip_suffix('h') {
        let hours: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid hours: {}", num))?;
        return hours
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| "duration too large".to_string());
    }

    if let Some(num) = src.strip_suffix('m') {
        let minutes: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid minutes: {}", num))?;
        return minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| "duration too large".to_string());
    }

    if let Some(num) = src.strip_suffix('s') {
        return parse_seconds(num, src);
    }

    parse_seconds(src, src)
}
