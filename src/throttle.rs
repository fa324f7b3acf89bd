//! Per-device pacing of delivered readings.
//!
//! Broadcasters advertise far more often than the gateway needs a reading,
//! so each device is allowed at most one delivered message per interval.

use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Limits the rate of events per device.
///
/// The first event for a device is always allowed. A zero interval disables
/// throttling.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_emitted: HashMap<MacAddress, Instant>,
}

impl Throttle {
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use hci_sensor_agent::throttle::Throttle;
    ///
    /// let throttle = Throttle::new(Duration::from_secs(1));
    /// ```
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_emitted: HashMap::new(),
        }
    }

    /// Returns `true` if enough time has passed since the last emitted event
    /// for `address`. Does not record anything; call [`Throttle::record`]
    /// once the event has actually been delivered.
    pub fn should_emit(&self, address: &MacAddress) -> bool {
        self.should_emit_at(address, Instant::now())
    }

    /// Mark an event for `address` as delivered now.
    pub fn record(&mut self, address: MacAddress) {
        self.record_at(address, Instant::now());
    }

    fn should_emit_at(&self, address: &MacAddress, now: Instant) -> bool {
        match self.last_emitted.get(address) {
            Some(last) => now.duration_since(*last) >= self.interval,
            None => true,
        }
    }

    fn record_at(&mut self, address: MacAddress, now: Instant) {
        self.last_emitted.insert(address, now);
    }
}
