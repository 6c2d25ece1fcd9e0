//! # Inter-Processor Messages
//!
//! The bridge between the processors carries only two kinds of message:
//!
//! ```text
//! ┌───────────────────────┐                 ┌───────────────────────┐
//! │         Host          │ ── Address ───► │      Controller       │
//! │                       │ ── Value(n) ──► │                       │
//! │                       │ ◄── Value(n) ── │                       │
//! └───────────────────────┘                 └───────────────────────┘
//! ```
//!
//! `Address` is sent once and carries the location of the shared state.
//! `Value` carries a [Signal]. Nothing else travels over the bridge; all
//! state lives in shared memory.

/// Small integer signals understood by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum Signal {
    /// Power the radio down.
    Disable = 0,
    /// Power the radio up.
    Enable = 1,
    /// Re-examine the shared state.
    Sync = 2,
}

impl TryFrom<u32> for Signal {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disable),
            1 => Ok(Self::Enable),
            2 => Ok(Self::Sync),
            other => Err(other),
        }
    }
}

impl From<Signal> for u32 {
    fn from(signal: Signal) -> Self {
        signal as u32
    }
}

/// One message on the bridge. `A` is the address representation, a raw
/// pointer-sized value on hardware or a shared handle in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMessage<A> {
    Address(A),
    Value(u32),
}

impl<A> IpcMessage<A> {
    pub fn signal(signal: Signal) -> Self {
        Self::Value(signal.into())
    }

    /// The carried signal, if this is a known value message.
    pub fn as_signal(&self) -> Option<Signal> {
        match self {
            Self::Value(v) => Signal::try_from(*v).ok(),
            Self::Address(_) => None,
        }
    }
}
