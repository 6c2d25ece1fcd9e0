//! # IEEE 802.11 Definitions
//!
//! Constants and fixed-layout headers shared by the frame codec, the rings
//! and the controller.
//!
//! ## Frame Layout In The Rings
//!
//! ```text
//! TX ring:  ┌──────────────┬──────────────────┬─────────┬──────────────┐
//!           │ TX hdr (12B) │ 802.11 hdr (24B) │ body... │ (FCS by MAC) │
//!           └──────────────┴──────────────────┴─────────┴──────────────┘
//! RX ring:  ┌──────────────┬──────────────────┬─────────┐
//!           │ RX hdr (12B) │ 802.11 hdr (24B) │ body... │  padded to 4B
//!           └──────────────┴──────────────────┴─────────┘
//! ```
//!
//! All header fields are little-endian halfwords.

use core::fmt;

/// Size of the hardware TX header.
pub const TX_HEADER_SIZE: usize = 12;
/// Size of the hardware RX header.
pub const RX_HEADER_SIZE: usize = 12;
/// Size of a management / three-address data MAC header.
pub const MAC_HEADER_SIZE: usize = 24;
/// Frame check sequence appended by the MAC.
pub const FCS_SIZE: usize = 4;
/// WEP initialization vector, filled by the hardware.
pub const WEP_IV_SIZE: usize = 4;
/// WEP integrity check value, filled by the hardware.
pub const WEP_ICV_SIZE: usize = 4;
/// LLC/SNAP sub-header including the protocol tag.
pub const LLC_SIZE: usize = 8;
/// Fixed part of the LLC/SNAP sub-header.
pub const LLC_PREFIX: [u8; 6] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00];

/// Byte offset of the frame length inside the RX header.
pub const RX_LENGTH_OFFSET: usize = 8;
/// Byte offset of the rate/quality word inside the RX header.
pub const RX_RATE_OFFSET: usize = 10;

/// Frame control values and bits.
pub mod fc {
    pub const TYPE_ASSOC_REQUEST: u16 = 0x0000;
    pub const TYPE_ASSOC_RESPONSE: u16 = 0x0010;
    pub const TYPE_PROBE_RESPONSE: u16 = 0x0050;
    pub const TYPE_BEACON: u16 = 0x0080;
    pub const TYPE_DISASSOCIATION: u16 = 0x00A0;
    pub const TYPE_AUTHENTICATION: u16 = 0x00B0;
    pub const TYPE_DEAUTHENTICATION: u16 = 0x00C0;
    pub const TYPE_DATA: u16 = 0x0008;

    /// Type bits only (management / control / data).
    pub const TYPE_MASK: u16 = 0x000C;
    /// Type and subtype bits.
    pub const TYPE_SUBTYPE_MASK: u16 = 0x00FC;

    pub const TYPE_MANAGEMENT: u16 = 0x0000;

    pub const TO_DS: u16 = 0x0100;
    pub const FROM_DS: u16 = 0x0200;
    pub const PROTECTED_FRAME: u16 = 0x4000;
}

/// Capability information bits.
pub mod caps {
    pub const ESS: u16 = 0x0001;
    pub const IBSS: u16 = 0x0002;
    pub const PRIVACY: u16 = 0x0010;
    pub const SHORT_PREAMBLE: u16 = 0x0020;
}

/// Supported-rates element encoding (500 kbit/s units).
pub mod rate {
    pub const MANDATORY: u8 = 0x80;
    pub const RATE_1_MBPS: u8 = 0x02;
    pub const RATE_2_MBPS: u8 = 0x04;
}

/// Information element tags.
pub mod eid {
    pub const SSID: u8 = 0;
    pub const SUPPORTED_RATES: u8 = 1;
    pub const DS_PARAM_SET: u8 = 3;
    pub const TIM: u8 = 5;
    pub const VENDOR: u8 = 221;
}

/// Hardware transfer rate codes written into the TX header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum TxRate {
    /// 1 Mbit/s, used for management frames.
    Mbps1 = 0x0A,
    /// 2 Mbit/s.
    Mbps2 = 0x14,
}

/// A 48-bit hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Read an address from the first six bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for MacAddr {
    fn format(&self, f: defmt::Formatter) {
        let m = &self.0;
        defmt::write!(
            f,
            "{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}:{=u8:02x}",
            m[0],
            m[1],
            m[2],
            m[3],
            m[4],
            m[5]
        )
    }
}

#[inline]
pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let b = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

/// Hardware TX header prepended to every frame handed to the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxHeader {
    /// Raw [TxRate] code. Zero lets the controller pick the rate.
    pub rate: u16,
    /// IEEE frame length including the FCS.
    pub length: u16,
}

impl TxHeader {
    pub const fn new(rate: TxRate, length: u16) -> Self {
        Self {
            rate: rate as u16,
            length,
        }
    }

    pub fn encode(&self) -> [u8; TX_HEADER_SIZE] {
        let mut out = [0u8; TX_HEADER_SIZE];
        out[8..10].copy_from_slice(&self.rate.to_le_bytes());
        out[10..12].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            rate: read_u16(bytes, 8)?,
            length: read_u16(bytes, 10)?,
        })
    }
}

/// Hardware RX header written in front of every received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxHeader {
    /// IEEE frame length in bytes, FCS excluded.
    pub length: u16,
    /// Rate in the low byte, signal quality in the high byte.
    pub rate_quality: u16,
}

impl RxHeader {
    pub fn encode(&self) -> [u8; RX_HEADER_SIZE] {
        let mut out = [0u8; RX_HEADER_SIZE];
        out[RX_LENGTH_OFFSET..RX_LENGTH_OFFSET + 2].copy_from_slice(&self.length.to_le_bytes());
        out[RX_RATE_OFFSET..RX_RATE_OFFSET + 2].copy_from_slice(&self.rate_quality.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            length: read_u16(bytes, RX_LENGTH_OFFSET)?,
            rate_quality: read_u16(bytes, RX_RATE_OFFSET)?,
        })
    }
}

/// The 24-byte header shared by management frames and three-address data
/// frames. Address meaning depends on the frame type and DS bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacHeader {
    pub frame_control: u16,
    pub duration: u16,
    pub addr1: MacAddr,
    pub addr2: MacAddr,
    pub addr3: MacAddr,
    pub seq_ctl: u16,
}

impl MacHeader {
    pub fn encode(&self) -> [u8; MAC_HEADER_SIZE] {
        let mut out = [0u8; MAC_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.frame_control.to_le_bytes());
        out[2..4].copy_from_slice(&self.duration.to_le_bytes());
        out[4..10].copy_from_slice(&self.addr1.0);
        out[10..16].copy_from_slice(&self.addr2.0);
        out[16..22].copy_from_slice(&self.addr3.0);
        out[22..24].copy_from_slice(&self.seq_ctl.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MAC_HEADER_SIZE {
            return None;
        }
        Some(Self {
            frame_control: read_u16(bytes, 0)?,
            duration: read_u16(bytes, 2)?,
            addr1: MacAddr::from_slice(&bytes[4..])?,
            addr2: MacAddr::from_slice(&bytes[10..])?,
            addr3: MacAddr::from_slice(&bytes[16..])?,
            seq_ctl: read_u16(bytes, 22)?,
        })
    }

    /// Type and subtype bits of the frame control field.
    pub fn kind(&self) -> u16 {
        self.frame_control & fc::TYPE_SUBTYPE_MASK
    }
}

/// Iterator over the tag/length/value elements of a management body.
///
/// Iteration stops at the first truncated element.
#[derive(Clone)]
pub struct InfoElements<'a> {
    data: &'a [u8],
}

impl<'a> InfoElements<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Value of the first element carrying `tag`.
    pub fn find_tag(mut self, tag: u8) -> Option<&'a [u8]> {
        self.find_map(|(t, v)| (t == tag).then_some(v))
    }
}

impl<'a> Iterator for InfoElements<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (&tag, rest) = self.data.split_first()?;
        let (&len, rest) = rest.split_first()?;
        let len = len as usize;
        if rest.len() < len {
            self.data = &[];
            return None;
        }
        let (value, rest) = rest.split_at(len);
        self.data = rest;
        Some((tag, value))
    }
}
