//! Output formatters and gateway wire framing.
//!
//! A formatter turns a [`SensorEvent`] into the text document the gateway
//! expects; [`wire`] wraps that text for the socket.

pub mod json;
pub mod wire;

use crate::filter::SensorEvent;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for formatting sensor events into gateway messages.
pub trait OutputFormatter: Send + Sync {
    /// Format `event`, labelled with the display `name` resolved for its device.
    fn format(&self, event: &SensorEvent, name: &str) -> Result<String, FormatError>;
}
