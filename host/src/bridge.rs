//! # In-Process Bridge
//!
//! Stands in for the hardware FIFO between the processors: a pair of
//! unbounded tokio channels carrying [IpcMessage]s, with the shared state
//! handle as the address type.
//!
//! ```text
//! ┌──────────────┐   host.tx ──► controller.rx   ┌──────────────┐
//! │ IpcEndpoint  │                               │ IpcEndpoint  │
//! │   (host)     │   host.rx ◄── controller.tx   │ (controller) │
//! └──────────────┘                               └──────────────┘
//! ```

use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use wifi_shared::{IpcMessage, Notifier, SharedState, Signal};

use crate::error::SessionError;

/// Address type carried over the bridge.
pub type StateHandle = Arc<SharedState>;

pub type Message = IpcMessage<StateHandle>;

/// One end of the bridge.
pub struct IpcEndpoint {
    tx: UnboundedSender<Message>,
    rx: UnboundedReceiver<Message>,
}

/// A connected (host, controller) pair of endpoints.
pub fn channel() -> (IpcEndpoint, IpcEndpoint) {
    let (host_tx, controller_rx) = mpsc::unbounded_channel();
    let (controller_tx, host_rx) = mpsc::unbounded_channel();
    (
        IpcEndpoint {
            tx: host_tx,
            rx: host_rx,
        },
        IpcEndpoint {
            tx: controller_tx,
            rx: controller_rx,
        },
    )
}

impl IpcEndpoint {
    pub fn send(&self, message: Message) -> Result<(), SessionError> {
        self.tx.send(message).map_err(|_| SessionError::ChannelClosed)
    }

    pub fn send_signal(&self, signal: Signal) -> Result<(), SessionError> {
        self.send(IpcMessage::signal(signal))
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Result<Option<Message>, SessionError> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SessionError::ChannelClosed),
        }
    }

    /// Wait for the next message. `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// A notifier that sends Sync to the peer of this endpoint.
    pub fn notifier(&self) -> PeerNotifier {
        PeerNotifier {
            tx: self.tx.clone(),
        }
    }
}

/// Sends [Signal::Sync] over the bridge.
#[derive(Clone)]
pub struct PeerNotifier {
    tx: UnboundedSender<Message>,
}

impl Notifier for PeerNotifier {
    fn notify_peer(&self) {
        if self.tx.send(IpcMessage::signal(Signal::Sync)).is_err() {
            debug!("bridge: peer gone, sync dropped");
        }
    }
}
