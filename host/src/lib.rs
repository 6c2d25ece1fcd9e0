//! # Host Session Library
//!
//! The application-facing half of the dual-processor WiFi driver. It owns
//! the shared state, turns API calls into request fields and reacts to
//! sync notifications from the controller:
//!
//! - **Session**: lifecycle, mode/channel/WEP requests, connect, transmit
//! - **Bridge**: in-process stand-in for the inter-processor FIFO
//! - **Network stack glue**: delivery of received frames upwards
//! - **Beacon emitter**: periodic beacons while hosting a network
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Application                            │
//! │                                                                 │
//! │   connect / transmit / stats           NetworkStack (receive)   │
//! │            │                                    ▲               │
//! │            ▼                                    │               │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                   Session (this lib)                     │   │
//! │  │                                                          │   │
//! │  │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────┐   │   │
//! │  │  │  HostPort   │  │  TX / RX    │  │ BeaconEmitter   │   │   │
//! │  │  │  (shared)   │  │  rings      │  │                 │   │   │
//! │  │  └─────────────┘  └─────────────┘  └─────────────────┘   │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │            │ IpcEndpoint (Address, Value)                       │
//! └────────────┼────────────────────────────────────────────────────┘
//!              ▼
//!         Controller
//! ```

use std::sync::Once;

use log::{info, LevelFilter};

pub mod beacon;
pub mod bridge;
pub mod config;
pub mod error;
pub mod netif;
pub mod session;

pub use beacon::BeaconEmitter;
pub use bridge::{channel, IpcEndpoint, PeerNotifier, StateHandle};
pub use config::{AddressMode, SessionConfig};
pub use error::SessionError;
pub use netif::{AddressConfig, NetworkStack, UpperFrame};
pub use session::{Network, Session};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Install the logger. `RUST_LOG` overrides the default `debug` level.
/// Safe to call more than once.
pub fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .parse_default_env()
            .format_timestamp_millis()
            .try_init();
        info!("wifi host library {}", wifi_shared::VERSION);
    });
}
