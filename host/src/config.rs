//! Session configuration.
//!
//! Everything has a default, so an empty JSON object is a valid config:
//!
//! ```json
//! { "tick_ms": 50, "address": { "Static": { "local": "192.168.1.20", ... } } }
//! ```

use serde::{Deserialize, Serialize};

use wifi_shared::{MTU, RX_DISPATCH_CAP};

use crate::error::SessionError;
use crate::netif::AddressConfig;

/// How the interface gets its IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AddressMode {
    /// Fixed addressing, applied as soon as the link comes up.
    Static(AddressConfig),
    /// The network stack negotiates an address once associated; the session
    /// reports it through `set_address_config`.
    #[default]
    Acquire,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timer period in milliseconds.
    pub tick_ms: u64,
    /// Received frames dispatched per sync before yielding.
    pub rx_dispatch_cap: usize,
    /// Ticks between beacons while beaconing.
    pub beacon_interval_ticks: u32,
    /// Largest payload accepted by `transmit`.
    pub mtu: usize,
    pub address: AddressMode,
    /// Ticks `wait_until_ready` waits for the controller.
    pub ready_timeout_ticks: u32,
    /// Guests announced in beacons.
    pub max_guests: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            rx_dispatch_cap: RX_DISPATCH_CAP,
            beacon_interval_ticks: 2,
            mtu: MTU,
            address: AddressMode::default(),
            ready_timeout_ticks: 100,
            max_guests: 0,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms)
    }
}
