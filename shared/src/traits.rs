//! # Collaborator Abstractions
//!
//! Traits for everything the driver core does not implement itself:
//!
//! - **HalfwordMemory**: the byte window that backs a ring (MAC RAM or the
//!   shared arena). Accessed at halfword granularity only.
//! - **Radio**: the hardware MAC/baseband on the controller side.
//! - **Notifier**: the "sync now" wake signal to the peer processor.
//!
//! Keeping these behind traits lets every component run in unit tests with
//! in-memory fakes.

use core::fmt::Debug;
use core::sync::atomic::{AtomicU16, Ordering};

use crate::ieee::MacAddr;
use crate::state::WepMode;

/// A halfword-addressable memory window.
///
/// Writes take `&self` because the window is shared with the other
/// processor; implementations provide their own interior mutability.
pub trait HalfwordMemory {
    /// Number of halfwords in the window.
    fn halfwords(&self) -> usize;

    /// Read the halfword at `index`. `index` is always `< halfwords()`.
    fn read_halfword(&self, index: usize) -> u16;

    /// Write the halfword at `index`. `index` is always `< halfwords()`.
    fn write_halfword(&self, index: usize, value: u16);
}

impl HalfwordMemory for [AtomicU16] {
    fn halfwords(&self) -> usize {
        self.len()
    }

    fn read_halfword(&self, index: usize) -> u16 {
        self[index].load(Ordering::Relaxed)
    }

    fn write_halfword(&self, index: usize, value: u16) {
        self[index].store(value, Ordering::Relaxed)
    }
}

/// Wake signal towards the peer processor.
///
/// Carries no payload: on receipt the peer re-examines the shared state.
pub trait Notifier {
    fn notify_peer(&self);
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify_peer(&self) {
        (**self).notify_peer()
    }
}

/// The hardware MAC as seen by the controller.
pub trait Radio {
    type Error: Debug;

    /// Factory-programmed hardware address.
    fn mac_address(&self) -> MacAddr;

    /// Power the transceiver up or down.
    fn set_enabled(&mut self, enabled: bool);

    /// Tune to a channel (1-13).
    fn set_channel(&mut self, channel: u8);

    /// Pass frames not addressed to us.
    fn set_promiscuous(&mut self, enabled: bool);

    /// Load the WEP key used by the hardware to fill IV/ICV.
    fn set_wep(&mut self, mode: WepMode, key: &[u8]);

    /// Transmit one frame: hardware TX header followed by the IEEE frame.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error>;
}
