use thiserror::Error;

use wifi_shared::{FrameError, RequestError, RingFull};

/// Errors surfaced by the host session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot allocate shared state")]
    AllocationFailure,
    #[error("cannot connect to the requested network")]
    LinkFailure,
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    #[error("no space in transmit ring")]
    NoSpace,
    #[error("network is not up")]
    NetworkDown,
    #[error("controller did not become ready")]
    NotReady,
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("bridge to controller closed")]
    ChannelClosed,
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<RingFull> for SessionError {
    fn from(_: RingFull) -> Self {
        Self::NoSpace
    }
}
