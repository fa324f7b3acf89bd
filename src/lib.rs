//! `hci-sensor-agent` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The forwarding loop lives in [`crate::agent`] where it
//! can be tested deterministically with an injected frame source and gateway
//! connector.

pub mod agent;
pub mod alias;
pub mod config;
pub mod decoder;
pub mod delivery;
pub mod filter;
pub mod mac_address;
pub mod output;
pub mod scanner;
pub mod throttle;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use agent::{AgentLoop, ExceptionCounter, RunError, Shutdown, ShutdownTrigger, shutdown_channel};
pub use alias::{Alias, AliasMap, parse_alias};
pub use config::{AgentConfig, ConfigError, Options, parse_duration};
pub use decoder::{AdvertisingReport, DecodeError, PacketDecoder, ReportLayout};
pub use delivery::{ConnectionState, Connector, DeliveryChannel, RetryPolicy, SendError, TcpConnector};
pub use filter::{DeviceSignature, ReportFilter, SensorEvent};
pub use mac_address::MacAddress;
pub use output::OutputFormatter;
pub use output::json::{GatewayMetadata, JsonFormatter};
pub use scanner::{FrameSource, ReceiveError, ScanError};
pub use throttle::Throttle;
