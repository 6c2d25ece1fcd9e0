//! # Network Stack Glue
//!
//! The session speaks to an upper-layer stack through [NetworkStack]. The
//! stack sees Ethernet-shaped frames: destination, source, protocol and
//! payload. 802.11 addressing and LLC encapsulation stay below this line.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use wifi_shared::MacAddr;

/// A frame as seen by the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpperFrame<'a> {
    pub dest: MacAddr,
    pub src: MacAddr,
    /// EtherType of the payload.
    pub protocol: u16,
    pub payload: &'a [u8],
}

/// IPv4 settings of the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConfig {
    pub local: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dns: [Ipv4Addr; 2],
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            local: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            netmask: Ipv4Addr::UNSPECIFIED,
            dns: [Ipv4Addr::UNSPECIFIED; 2],
        }
    }
}

/// Upper-layer stack attached to a session.
pub trait NetworkStack {
    /// Called once when the controller is ready, with the interface address.
    fn attach(&mut self, mac: MacAddr, mtu: usize);

    /// One accepted data frame.
    fn receive(&mut self, frame: UpperFrame<'_>);

    /// Frames can flow.
    fn link_up(&mut self);

    /// The link is gone; the stack should stop sending.
    fn link_down(&mut self);

    /// New interface addressing.
    fn set_address(&mut self, config: &AddressConfig);
}
