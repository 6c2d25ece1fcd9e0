//! # Shared Driver Core
//!
//! This crate holds everything both processors agree on, plus the
//! hardware-facing controller loop:
//!
//! - **Shared State**: single-writer-per-field device state with scoped
//!   publish/observe barriers
//! - **Rings**: halfword circular buffers moving raw frames in both
//!   directions
//! - **Frame Codec**: 802.11 management/data headers, beacons, vendor
//!   elements
//! - **Association Engine**: explicit state machine from idle to joined
//! - **Controller**: applies host requests to the radio and feeds the rings
//!
//! ## Architecture
//!
//! ```text
//!      Host processor                              Controller processor
//! ┌──────────────────────┐     IpcMessage      ┌──────────────────────┐
//! │ HostPort             │ ──── Address ─────► │ Controller           │
//! │  publish / observe   │ ◄─── Value(Sync) ─► │  AssociationEngine   │
//! └──────────┬───────────┘                     └──────────┬───────────┘
//!            │             ┌───────────────┐              │
//!            └────────────►│  SharedState  │◄─────────────┘
//!                          │  requests     │
//!                          │  status       │        ┌─────────┐
//!                          │  TX ring ─────┼───────►│  Radio  │
//!                          │  RX ring ◄────┼────────│         │
//!                          └───────────────┘        └─────────┘
//! ```
//!
//! ## Memory Model
//!
//! The structure is shared between processors without locks:
//! 1. Every field has exactly one writer
//! 2. Writers flush before notifying, readers invalidate before reading
//! 3. Each field is meaningful on its own, so torn multi-field reads are
//!    harmless

#![cfg_attr(not(feature = "std"), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

pub mod assoc;
pub mod controller;
pub mod frame;
pub mod ieee;
pub mod ipc;
pub mod ring;
pub mod state;
pub mod traits;

// Re-export main types for convenience
pub use assoc::{Action, AssociationEngine, Event, State, Target, Timeouts};
pub use controller::{Controller, ControllerConfig};
pub use frame::{FrameError, Topology};
pub use ieee::{MacAddr, TxRate};
pub use ipc::{IpcMessage, Signal};
pub use ring::{FrameLength, RingFull, RX_BUFFER_SIZE, TX_BUFFER_SIZE};
pub use state::{
    AssocStatus, CacheMaintenance, Coherent, ControllerPort, HostPort, RequestError, RequestFlags,
    SharedState, Ssid, Stats, WepMode, WifiMode,
};
pub use traits::{HalfwordMemory, Notifier, Radio};

/// Library version for compatibility checks between the two sides.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest upper-layer payload carried in one data frame.
pub const MTU: usize = 2300;

/// Scratch space for one frame in either ring, headers included.
pub const MAX_FRAME_LEN: usize = 2400;

/// Frames dispatched per RX poll before yielding.
pub const RX_DISPATCH_CAP: usize = 80;
