//! # 802.11 Frame Codec
//!
//! Builders write straight into caller-provided buffers (ring staging or
//! scratch), always starting with the 12-byte hardware TX header. Parsers
//! work on the IEEE frame alone, without the hardware RX header.
//!
//! ## Beacon Body
//!
//! ```text
//! ┌───────────┬──────────┬──────┬──────────┬─────────┬─────────┬────────┬───────────────┐
//! │ timestamp │ interval │ caps │ SSID IE  │ rates   │ DS IE   │ TIM IE │ vendor IE     │
//! │ 8 (zero)  │ 2 (100)  │ 2    │ optional │ 84 82   │ channel │ 6 zero │ 26 bytes      │
//! └───────────┴──────────┴──────┴──────────┴─────────┴─────────┴────────┴───────────────┘
//! ```
//!
//! ## Data Frame Addressing
//!
//! | topology       | FC bits | A1     | A2   | A3     |
//! |----------------|---------|--------|------|--------|
//! | ad-hoc         | -       | dest   | self | BSSID  |
//! | infrastructure | TO_DS   | BSSID  | self | dest   |
//!
//! With WEP the frame gets PROTECTED, a 4-byte IV after the header and a
//! 4-byte ICV after the body. Both are left for the hardware to fill.

use crate::ieee::{
    caps, eid, fc, rate, InfoElements, MacAddr, MacHeader, TxHeader, TxRate, FCS_SIZE, LLC_PREFIX,
    LLC_SIZE, MAC_HEADER_SIZE, TX_HEADER_SIZE, WEP_ICV_SIZE, WEP_IV_SIZE,
};
use crate::state::MAX_SSID_LEN;

/// Organizationally unique identifier of the vendor beacon element.
pub const VENDOR_OUI: [u8; 3] = [0x00, 0x09, 0xBF];
/// Protocol identifier carried in every vendor beacon element.
pub const VENDOR_FIXED_ID: u32 = 0x0040_0001;
/// Payload length of the vendor beacon element.
pub const VENDOR_IE_LEN: usize = 26;
/// Beacon interval in time units.
pub const BEACON_INTERVAL_TU: u16 = 100;
/// Timestamp, interval and capability in front of beacon elements.
pub const BEACON_FIXED_SIZE: usize = 12;
/// Largest beacon this codec produces, hardware header included.
pub const BEACON_MAX_LEN: usize =
    TX_HEADER_SIZE + MAC_HEADER_SIZE + BEACON_FIXED_SIZE + (2 + MAX_SSID_LEN) + 4 + 3 + 8 + (2 + VENDOR_IE_LEN);
/// Largest management frame built by [build_auth] or [build_assoc_request].
pub const MGMT_MAX_LEN: usize = 96;

/// Frame rejected by a parser, or a builder input that cannot be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Shorter than its headers claim.
    Truncated,
    /// Not a plain data frame travelling away from the distribution system.
    NotData,
    /// Addressed to someone else.
    NotForUs,
    /// LLC/SNAP prefix missing.
    BadLlc,
    /// Management subtype this codec does not decode.
    Unsupported(u16),
    SsidTooLong(usize),
    /// Output buffer cannot hold the frame.
    BufferTooSmall,
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Truncated => f.write_str("truncated frame"),
            Self::NotData => f.write_str("not a from-DS data frame"),
            Self::NotForUs => f.write_str("frame not addressed to us"),
            Self::BadLlc => f.write_str("bad LLC header"),
            Self::Unsupported(kind) => write!(f, "unsupported frame type {:#06x}", kind),
            Self::SsidTooLong(len) => write!(f, "ssid of {} bytes", len),
            Self::BufferTooSmall => f.write_str("output buffer too small"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

/// Sequential little-endian writer over an output buffer.
struct FrameWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FrameWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        let end = self.pos + bytes.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(FrameError::BufferTooSmall)?
            .copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn put_u8(&mut self, value: u8) -> Result<(), FrameError> {
        self.put(&[value])
    }

    fn put_u16(&mut self, value: u16) -> Result<(), FrameError> {
        self.put(&value.to_le_bytes())
    }

    /// Zero-fill `n` bytes.
    fn zeros(&mut self, n: usize) -> Result<(), FrameError> {
        let end = self.pos + n;
        self.buf
            .get_mut(self.pos..end)
            .ok_or(FrameError::BufferTooSmall)?
            .fill(0);
        self.pos = end;
        Ok(())
    }

    fn element(&mut self, tag: u8, value: &[u8]) -> Result<(), FrameError> {
        self.put_u8(tag)?;
        self.put_u8(value.len() as u8)?;
        self.put(value)
    }
}

/// The three addresses of a management frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MgmtAddrs {
    pub receiver: MacAddr,
    pub transmitter: MacAddr,
    pub bssid: MacAddr,
}

/// Write hardware header, MAC header and `body` into `out`. Returns the
/// number of bytes written.
fn management(
    out: &mut [u8],
    tx_rate: TxRate,
    kind: u16,
    addrs: &MgmtAddrs,
    body: impl FnOnce(&mut FrameWriter<'_>) -> Result<(), FrameError>,
) -> Result<usize, FrameError> {
    let len = {
        let mut w = FrameWriter::new(out);
        w.zeros(TX_HEADER_SIZE)?;
        let header = MacHeader {
            frame_control: kind,
            duration: 0,
            addr1: addrs.receiver,
            addr2: addrs.transmitter,
            addr3: addrs.bssid,
            seq_ctl: 0,
        };
        w.put(&header.encode())?;
        body(&mut w)?;
        w.pos
    };
    let ieee_len = (len - TX_HEADER_SIZE + FCS_SIZE) as u16;
    out[..TX_HEADER_SIZE].copy_from_slice(&TxHeader::new(tx_rate, ieee_len).encode());
    Ok(len)
}

/// Contents of the vendor beacon element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VendorBeacon {
    pub stepping_offset: u16,
    pub sync: u16,
    pub game_id: u32,
    pub stream_code: u16,
    pub beacon_type: u8,
    /// Command payload size in halfwords.
    pub cmd_size: u16,
    /// Reply payload size in halfwords.
    pub reply_size: u16,
    pub players_max: u8,
    pub players_current: u8,
}

impl VendorBeacon {
    /// Beacon type announcing a multiplayer host.
    pub const TYPE_HOST: u8 = 1;
    const EXTRA_DATA_SIZE: u8 = 2;

    pub fn encode(&self) -> [u8; VENDOR_IE_LEN] {
        let mut out = [0u8; VENDOR_IE_LEN];
        out[0..3].copy_from_slice(&VENDOR_OUI);
        out[3] = 0;
        out[4..6].copy_from_slice(&self.stepping_offset.to_le_bytes());
        out[6..8].copy_from_slice(&self.sync.to_le_bytes());
        out[8..12].copy_from_slice(&VENDOR_FIXED_ID.to_le_bytes());
        out[12..16].copy_from_slice(&self.game_id.to_le_bytes());
        out[16..18].copy_from_slice(&self.stream_code.to_le_bytes());
        out[18] = Self::EXTRA_DATA_SIZE;
        out[19] = self.beacon_type;
        out[20..22].copy_from_slice(&self.cmd_size.to_le_bytes());
        out[22..24].copy_from_slice(&self.reply_size.to_le_bytes());
        out[24] = self.players_max;
        out[25] = self.players_current;
        out
    }

    /// Decode a vendor element value. `None` for foreign vendors.
    pub fn decode(value: &[u8]) -> Option<Self> {
        if value.len() < VENDOR_IE_LEN || value[0..3] != VENDOR_OUI || value[3] != 0 {
            return None;
        }
        let u16_at = |i: usize| u16::from_le_bytes([value[i], value[i + 1]]);
        Some(Self {
            stepping_offset: u16_at(4),
            sync: u16_at(6),
            game_id: u32::from_le_bytes([value[12], value[13], value[14], value[15]]),
            stream_code: u16_at(16),
            beacon_type: value[19],
            cmd_size: u16_at(20),
            reply_size: u16_at(22),
            players_max: value[24],
            players_current: value[25],
        })
    }
}

/// Inputs of a beacon.
#[derive(Debug, Clone, Copy)]
pub struct BeaconParams<'a> {
    /// Own address, used as source and BSSID.
    pub own: MacAddr,
    pub ssid: &'a [u8],
    pub channel: u8,
    pub game_id: u32,
    pub max_guests: u8,
}

/// Build a complete beacon (hardware header included) into `out`.
pub fn build_beacon(params: &BeaconParams<'_>, out: &mut [u8]) -> Result<usize, FrameError> {
    if params.ssid.len() > MAX_SSID_LEN {
        return Err(FrameError::SsidTooLong(params.ssid.len()));
    }
    let addrs = MgmtAddrs {
        receiver: MacAddr::BROADCAST,
        transmitter: params.own,
        bssid: params.own,
    };
    let vendor = VendorBeacon {
        game_id: params.game_id,
        beacon_type: VendorBeacon::TYPE_HOST,
        players_max: params.max_guests.saturating_add(1),
        players_current: 1,
        ..Default::default()
    };
    management(out, TxRate::Mbps2, fc::TYPE_BEACON, &addrs, |w| {
        w.zeros(8)?;
        w.put_u16(BEACON_INTERVAL_TU)?;
        w.put_u16(caps::ESS)?;
        if !params.ssid.is_empty() {
            w.element(eid::SSID, params.ssid)?;
        }
        w.element(
            eid::SUPPORTED_RATES,
            &[rate::MANDATORY | rate::RATE_2_MBPS, rate::MANDATORY | rate::RATE_1_MBPS],
        )?;
        w.element(eid::DS_PARAM_SET, &[params.channel])?;
        w.element(eid::TIM, &[0; 6])?;
        w.element(eid::VENDOR, &vendor.encode())
    })
}

/// Rewrite the DS parameter element of a beacon to `channel`.
///
/// `frame` starts at the MAC header. Returns false if `frame` is not a
/// beacon or carries no DS parameter element.
pub fn patch_beacon_channel(frame: &mut [u8], channel: u8) -> bool {
    match MacHeader::decode(frame) {
        Some(header) if header.kind() == fc::TYPE_BEACON => {}
        _ => return false,
    }
    let mut pos = MAC_HEADER_SIZE + BEACON_FIXED_SIZE;
    while pos + 2 <= frame.len() {
        let (tag, len) = (frame[pos], frame[pos + 1] as usize);
        if tag == eid::DS_PARAM_SET && len == 1 && pos + 2 < frame.len() {
            frame[pos + 2] = channel;
            return true;
        }
        pos += 2 + len;
    }
    false
}

/// Network topology of the current link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Topology {
    /// Through an access point.
    Infrastructure,
    /// Directly between peers.
    AdHoc,
}

/// Inputs of a data frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeaderParams {
    pub topology: Topology,
    pub own: MacAddr,
    /// Negotiated BSSID.
    pub bssid: MacAddr,
    pub dest: MacAddr,
    pub wep: bool,
}

/// Length of the IEEE frame for a payload, as written into the TX header.
pub const fn data_tx_length(payload_len: usize, wep: bool) -> usize {
    let wep_extra = if wep { WEP_IV_SIZE + WEP_ICV_SIZE } else { 0 };
    MAC_HEADER_SIZE + wep_extra + LLC_SIZE + payload_len + FCS_SIZE
}

/// Ring bytes of a queued data frame (the FCS is not stored).
pub const fn data_frame_span(payload_len: usize, wep: bool) -> usize {
    TX_HEADER_SIZE + data_tx_length(payload_len, wep) - FCS_SIZE
}

/// Bytes written by [build_data_header].
pub const fn data_header_len(wep: bool) -> usize {
    TX_HEADER_SIZE + MAC_HEADER_SIZE + if wep { WEP_IV_SIZE } else { 0 }
}

/// Build the hardware header, MAC header and (with WEP) the IV placeholder
/// for a data frame carrying `payload_len` bytes after the LLC header.
///
/// The rate is left at zero for the controller to fill.
pub fn build_data_header(
    params: &DataHeaderParams,
    payload_len: usize,
    out: &mut [u8],
) -> Result<usize, FrameError> {
    let (mut frame_control, addr1, addr3) = match params.topology {
        Topology::AdHoc => (fc::TYPE_DATA, params.dest, params.bssid),
        Topology::Infrastructure => (fc::TYPE_DATA | fc::TO_DS, params.bssid, params.dest),
    };
    if params.wep {
        frame_control |= fc::PROTECTED_FRAME;
    }
    let length = u16::try_from(data_tx_length(payload_len, params.wep))
        .map_err(|_| FrameError::BufferTooSmall)?;
    let tx = TxHeader { rate: 0, length };
    let header = MacHeader {
        frame_control,
        duration: 0,
        addr1,
        addr2: params.own,
        addr3,
        seq_ctl: 0,
    };

    let mut w = FrameWriter::new(out);
    w.put(&tx.encode())?;
    w.put(&header.encode())?;
    if params.wep {
        w.zeros(WEP_IV_SIZE)?;
    }
    Ok(w.pos)
}

/// LLC/SNAP sub-header for an upper-layer protocol.
pub fn llc_header(protocol: u16) -> [u8; LLC_SIZE] {
    let mut out = [0u8; LLC_SIZE];
    out[..6].copy_from_slice(&LLC_PREFIX);
    out[6..].copy_from_slice(&protocol.to_be_bytes());
    out
}

/// A received data frame reduced to its upper-layer shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrame<'a> {
    pub dest: MacAddr,
    pub src: MacAddr,
    pub protocol: u16,
    pub payload: &'a [u8],
}

/// Accept a received data frame addressed to `own` (or broadcast).
///
/// Frames travelling towards the distribution system are not for a station
/// and are rejected along with everything else that is not plain data.
pub fn parse_data_frame(frame: &[u8], own: MacAddr) -> Result<DataFrame<'_>, FrameError> {
    let header = MacHeader::decode(frame).ok_or(FrameError::Truncated)?;
    if header.frame_control & (fc::TO_DS | fc::TYPE_SUBTYPE_MASK) != fc::TYPE_DATA {
        return Err(FrameError::NotData);
    }
    if header.addr1 != own && !header.addr1.is_broadcast() {
        return Err(FrameError::NotForUs);
    }
    let llc = frame
        .get(MAC_HEADER_SIZE..MAC_HEADER_SIZE + LLC_SIZE)
        .ok_or(FrameError::Truncated)?;
    if llc[..6] != LLC_PREFIX {
        return Err(FrameError::BadLlc);
    }
    let src = if header.frame_control & fc::FROM_DS != 0 {
        header.addr3
    } else {
        header.addr2
    };
    Ok(DataFrame {
        dest: header.addr1,
        src,
        protocol: u16::from_be_bytes([llc[6], llc[7]]),
        payload: &frame[MAC_HEADER_SIZE + LLC_SIZE..],
    })
}

/// Build an open-system authentication frame.
pub fn build_auth(
    addrs: &MgmtAddrs,
    sequence: u16,
    status: u16,
    out: &mut [u8],
) -> Result<usize, FrameError> {
    management(out, TxRate::Mbps1, fc::TYPE_AUTHENTICATION, addrs, |w| {
        w.put_u16(0)?;
        w.put_u16(sequence)?;
        w.put_u16(status)
    })
}

/// Build an association request for `ssid`.
pub fn build_assoc_request(
    addrs: &MgmtAddrs,
    capability: u16,
    listen_interval: u16,
    ssid: &[u8],
    out: &mut [u8],
) -> Result<usize, FrameError> {
    if ssid.len() > MAX_SSID_LEN {
        return Err(FrameError::SsidTooLong(ssid.len()));
    }
    management(out, TxRate::Mbps1, fc::TYPE_ASSOC_REQUEST, addrs, |w| {
        w.put_u16(capability)?;
        w.put_u16(listen_interval)?;
        w.element(eid::SSID, ssid)?;
        w.element(
            eid::SUPPORTED_RATES,
            &[rate::MANDATORY | rate::RATE_1_MBPS, rate::MANDATORY | rate::RATE_2_MBPS],
        )
    })
}

/// Build an association response, as sent by an access point.
pub fn build_assoc_response(
    addrs: &MgmtAddrs,
    status: u16,
    aid: u16,
    out: &mut [u8],
) -> Result<usize, FrameError> {
    management(out, TxRate::Mbps1, fc::TYPE_ASSOC_RESPONSE, addrs, |w| {
        w.put_u16(caps::ESS)?;
        w.put_u16(status)?;
        // The two top bits are always set on the wire.
        w.put_u16(aid | 0xC000)?;
        w.element(
            eid::SUPPORTED_RATES,
            &[rate::MANDATORY | rate::RATE_1_MBPS, rate::MANDATORY | rate::RATE_2_MBPS],
        )
    })
}

/// Build a deauthentication notice.
pub fn build_deauth(addrs: &MgmtAddrs, reason: u16, out: &mut [u8]) -> Result<usize, FrameError> {
    management(out, TxRate::Mbps1, fc::TYPE_DEAUTHENTICATION, addrs, |w| w.put_u16(reason))
}

/// Network description carried by beacons and probe responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BssInfo<'a> {
    pub bssid: MacAddr,
    pub ssid: &'a [u8],
    /// From the DS parameter element, when present.
    pub channel: Option<u8>,
    pub capability: u16,
    pub interval: u16,
    pub vendor: Option<VendorBeacon>,
}

impl BssInfo<'_> {
    pub fn is_adhoc(&self) -> bool {
        self.capability & caps::IBSS != 0
    }

    pub fn is_protected(&self) -> bool {
        self.capability & caps::PRIVACY != 0
    }
}

/// Decoded management frames the controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementFrame<'a> {
    Beacon(BssInfo<'a>),
    ProbeResponse(BssInfo<'a>),
    Authentication {
        header: MacHeader,
        algorithm: u16,
        sequence: u16,
        status: u16,
    },
    AssocResponse {
        header: MacHeader,
        status: u16,
        aid: u16,
    },
    Deauthentication {
        header: MacHeader,
        reason: u16,
    },
    Disassociation {
        header: MacHeader,
        reason: u16,
    },
}

fn body_u16(body: &[u8], offset: usize) -> Result<u16, FrameError> {
    crate::ieee::read_u16(body, offset).ok_or(FrameError::Truncated)
}

fn parse_bss<'a>(header: &MacHeader, body: &'a [u8]) -> Result<BssInfo<'a>, FrameError> {
    let ies = body.get(BEACON_FIXED_SIZE..).ok_or(FrameError::Truncated)?;
    let ssid = InfoElements::new(ies).find_tag(eid::SSID).unwrap_or(&[]);
    if ssid.len() > MAX_SSID_LEN {
        return Err(FrameError::SsidTooLong(ssid.len()));
    }
    Ok(BssInfo {
        bssid: header.addr3,
        ssid,
        channel: InfoElements::new(ies)
            .find_tag(eid::DS_PARAM_SET)
            .and_then(|v| v.first().copied()),
        capability: body_u16(body, 10)?,
        interval: body_u16(body, 8)?,
        vendor: InfoElements::new(ies)
            .filter(|(tag, _)| *tag == eid::VENDOR)
            .find_map(|(_, value)| VendorBeacon::decode(value)),
    })
}

/// Decode a management frame (starting at the MAC header).
pub fn parse_management(frame: &[u8]) -> Result<ManagementFrame<'_>, FrameError> {
    let header = MacHeader::decode(frame).ok_or(FrameError::Truncated)?;
    if header.frame_control & fc::TYPE_MASK != fc::TYPE_MANAGEMENT {
        return Err(FrameError::Unsupported(header.kind()));
    }
    let body = &frame[MAC_HEADER_SIZE..];
    match header.kind() {
        fc::TYPE_BEACON => Ok(ManagementFrame::Beacon(parse_bss(&header, body)?)),
        fc::TYPE_PROBE_RESPONSE => Ok(ManagementFrame::ProbeResponse(parse_bss(&header, body)?)),
        fc::TYPE_AUTHENTICATION => Ok(ManagementFrame::Authentication {
            header,
            algorithm: body_u16(body, 0)?,
            sequence: body_u16(body, 2)?,
            status: body_u16(body, 4)?,
        }),
        fc::TYPE_ASSOC_RESPONSE => Ok(ManagementFrame::AssocResponse {
            header,
            status: body_u16(body, 2)?,
            aid: body_u16(body, 4)? & 0x3FFF,
        }),
        fc::TYPE_DEAUTHENTICATION => Ok(ManagementFrame::Deauthentication {
            header,
            reason: body_u16(body, 0)?,
        }),
        fc::TYPE_DISASSOCIATION => Ok(ManagementFrame::Disassociation {
            header,
            reason: body_u16(body, 0)?,
        }),
        other => Err(FrameError::Unsupported(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWN: MacAddr = MacAddr([0x00, 0x09, 0xBF, 0x11, 0x22, 0x33]);
    const AP: MacAddr = MacAddr([0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
    const PEER: MacAddr = MacAddr([0x02, 0x01, 0x02, 0x03, 0x04, 0x05]);

    fn beacon(ssid: &[u8], channel: u8, max_guests: u8) -> ([u8; BEACON_MAX_LEN], usize) {
        let mut buf = [0u8; BEACON_MAX_LEN];
        let params = BeaconParams {
            own: OWN,
            ssid,
            channel,
            game_id: 0x1234_5678,
            max_guests,
        };
        let len = build_beacon(&params, &mut buf).unwrap();
        (buf, len)
    }

    #[test]
    fn test_beacon_ssid_round_trip() {
        let source = [b'n'; MAX_SSID_LEN];
        for len in 0..=MAX_SSID_LEN {
            let (buf, n) = beacon(&source[..len], 1, 0);
            let frame = &buf[TX_HEADER_SIZE..n];
            match parse_management(frame).unwrap() {
                ManagementFrame::Beacon(info) => {
                    assert_eq!(info.ssid, &source[..len]);
                    assert_eq!(info.bssid, OWN);
                }
                other => panic!("unexpected {:?}", other),
            }
            let ies = &frame[MAC_HEADER_SIZE + BEACON_FIXED_SIZE..];
            assert_eq!(InfoElements::new(ies).find_tag(eid::SSID).is_some(), len > 0);
        }
    }

    #[test]
    fn test_beacon_rejects_long_ssid() {
        let mut buf = [0u8; BEACON_MAX_LEN + 8];
        let params = BeaconParams {
            own: OWN,
            ssid: &[b'x'; 33],
            channel: 1,
            game_id: 0,
            max_guests: 0,
        };
        assert_eq!(build_beacon(&params, &mut buf), Err(FrameError::SsidTooLong(33)));
    }

    #[test]
    fn test_beacon_testnet_scenario() {
        let (buf, n) = beacon(b"TESTNET", 6, 0);
        let tx = TxHeader::decode(&buf).unwrap();
        assert_eq!(tx.rate, TxRate::Mbps2 as u16);
        assert_eq!(tx.length as usize, n - TX_HEADER_SIZE + FCS_SIZE);

        let frame = &buf[TX_HEADER_SIZE..n];
        let header = MacHeader::decode(frame).unwrap();
        assert_eq!(header.frame_control, 0x0080);
        assert_eq!(header.addr1, MacAddr::BROADCAST);
        assert_eq!(header.addr2, OWN);
        assert_eq!(header.addr3, OWN);

        let body = &frame[MAC_HEADER_SIZE..];
        assert_eq!(&body[..8], &[0; 8]);
        assert_eq!(&body[8..12], &[100, 0, 0x01, 0x00]);

        let mut ies = InfoElements::new(&body[BEACON_FIXED_SIZE..]);
        assert_eq!(ies.next(), Some((eid::SSID, &b"TESTNET"[..])));
        assert_eq!(ies.next(), Some((eid::SUPPORTED_RATES, &[0x84, 0x82][..])));
        assert_eq!(ies.next(), Some((eid::DS_PARAM_SET, &[6][..])));
        assert_eq!(ies.next(), Some((eid::TIM, &[0; 6][..])));
        let (tag, vendor) = ies.next().unwrap();
        assert_eq!(tag, eid::VENDOR);
        assert_eq!(vendor.len(), VENDOR_IE_LEN);
        assert_eq!(ies.next(), None);

        let decoded = VendorBeacon::decode(vendor).unwrap();
        assert_eq!(decoded.players_max, 1);
        assert_eq!(decoded.players_current, 1);
        assert_eq!(decoded.game_id, 0x1234_5678);
    }

    #[test]
    fn test_vendor_element_layout() {
        let vendor = VendorBeacon {
            game_id: 0x0A0B_0C0D,
            beacon_type: VendorBeacon::TYPE_HOST,
            players_max: 5,
            players_current: 1,
            ..Default::default()
        };
        let raw = vendor.encode();
        assert_eq!(&raw[0..4], &[0x00, 0x09, 0xBF, 0x00]);
        assert_eq!(&raw[8..12], &[0x01, 0x00, 0x40, 0x00]);
        assert_eq!(&raw[12..16], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(&raw[18..20], &[2, 1]);
        assert_eq!(&raw[24..26], &[5, 1]);

        let mut foreign = raw;
        foreign[2] = 0xF2;
        assert_eq!(VendorBeacon::decode(&foreign), None);
        assert_eq!(VendorBeacon::decode(&raw[..20]), None);
    }

    #[test]
    fn test_patch_beacon_channel() {
        let (mut buf, n) = beacon(b"net", 1, 3);
        assert!(patch_beacon_channel(&mut buf[TX_HEADER_SIZE..n], 11));
        match parse_management(&buf[TX_HEADER_SIZE..n]).unwrap() {
            ManagementFrame::Beacon(info) => {
                assert_eq!(info.channel, Some(11));
                assert_eq!(info.vendor.map(|v| v.players_max), Some(4));
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut auth = [0u8; MGMT_MAX_LEN];
        let addrs = MgmtAddrs { receiver: AP, transmitter: OWN, bssid: AP };
        let n = build_auth(&addrs, 1, 0, &mut auth).unwrap();
        assert!(!patch_beacon_channel(&mut auth[TX_HEADER_SIZE..n], 11));
    }

    fn data_params(topology: Topology, wep: bool) -> DataHeaderParams {
        DataHeaderParams {
            topology,
            own: OWN,
            bssid: AP,
            dest: PEER,
            wep,
        }
    }

    #[test]
    fn test_data_header_adhoc_addressing() {
        let mut buf = [0u8; 64];
        let n = build_data_header(&data_params(Topology::AdHoc, false), 100, &mut buf).unwrap();
        assert_eq!(n, data_header_len(false));
        let header = MacHeader::decode(&buf[TX_HEADER_SIZE..]).unwrap();
        assert_eq!(header.frame_control, fc::TYPE_DATA);
        assert_eq!((header.addr1, header.addr2, header.addr3), (PEER, OWN, AP));

        let tx = TxHeader::decode(&buf).unwrap();
        assert_eq!(tx.rate, 0);
        assert_eq!(tx.length as usize, 24 + 8 + 100 + 4);
    }

    #[test]
    fn test_data_header_infrastructure_addressing() {
        let mut buf = [0u8; 64];
        build_data_header(&data_params(Topology::Infrastructure, false), 10, &mut buf).unwrap();
        let header = MacHeader::decode(&buf[TX_HEADER_SIZE..]).unwrap();
        assert_ne!(header.frame_control & fc::TO_DS, 0);
        assert_eq!((header.addr1, header.addr2, header.addr3), (AP, OWN, PEER));
    }

    #[test]
    fn test_data_header_wep_reserves_iv_and_icv() {
        let mut buf = [0xFFu8; 64];
        let n = build_data_header(&data_params(Topology::Infrastructure, true), 10, &mut buf).unwrap();
        assert_eq!(n, TX_HEADER_SIZE + MAC_HEADER_SIZE + WEP_IV_SIZE);
        assert_eq!(&buf[36..40], &[0; 4]);
        let header = MacHeader::decode(&buf[TX_HEADER_SIZE..]).unwrap();
        assert_ne!(header.frame_control & fc::PROTECTED_FRAME, 0);

        let tx = TxHeader::decode(&buf).unwrap();
        assert_eq!(tx.length as usize, 24 + 4 + 8 + 10 + 4 + 4);
        assert_eq!(data_frame_span(10, true), 12 + 24 + 4 + 8 + 10 + 4);
    }

    fn received(frame_control: u16, addr1: MacAddr, llc: [u8; 8], payload: &[u8]) -> ([u8; 64], usize) {
        let header = MacHeader {
            frame_control,
            duration: 0,
            addr1,
            addr2: AP,
            addr3: PEER,
            seq_ctl: 0,
        };
        let mut buf = [0u8; 64];
        buf[..24].copy_from_slice(&header.encode());
        buf[24..32].copy_from_slice(&llc);
        buf[32..32 + payload.len()].copy_from_slice(payload);
        (buf, 32 + payload.len())
    }

    #[test]
    fn test_parse_data_frame_source_address() {
        let (buf, n) = received(fc::TYPE_DATA | fc::FROM_DS, OWN, llc_header(0x0800), b"ip");
        let data = parse_data_frame(&buf[..n], OWN).unwrap();
        assert_eq!(data.dest, OWN);
        assert_eq!(data.src, PEER);
        assert_eq!(data.protocol, 0x0800);
        assert_eq!(data.payload, b"ip");

        let (buf, n) = received(fc::TYPE_DATA, MacAddr::BROADCAST, llc_header(0x0806), b"arp");
        let data = parse_data_frame(&buf[..n], OWN).unwrap();
        assert_eq!(data.src, AP);
        assert_eq!(data.protocol, 0x0806);
    }

    #[test]
    fn test_parse_data_frame_rejects() {
        let (buf, n) = received(fc::TYPE_DATA, OWN, [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x01, 0x08, 0x00], b"x");
        assert_eq!(parse_data_frame(&buf[..n], OWN), Err(FrameError::BadLlc));

        let (buf, n) = received(fc::TYPE_DATA | fc::TO_DS, OWN, llc_header(0x0800), b"x");
        assert_eq!(parse_data_frame(&buf[..n], OWN), Err(FrameError::NotData));

        let (buf, n) = received(fc::TYPE_BEACON, OWN, llc_header(0x0800), b"x");
        assert_eq!(parse_data_frame(&buf[..n], OWN), Err(FrameError::NotData));

        let (buf, n) = received(fc::TYPE_DATA, PEER, llc_header(0x0800), b"x");
        assert_eq!(parse_data_frame(&buf[..n], OWN), Err(FrameError::NotForUs));

        let (buf, _) = received(fc::TYPE_DATA, OWN, llc_header(0x0800), b"");
        assert_eq!(parse_data_frame(&buf[..28], OWN), Err(FrameError::Truncated));
    }

    #[test]
    fn test_handshake_frames() {
        let to_ap = MgmtAddrs { receiver: AP, transmitter: OWN, bssid: AP };
        let from_ap = MgmtAddrs { receiver: OWN, transmitter: AP, bssid: AP };
        let mut buf = [0u8; MGMT_MAX_LEN];

        let n = build_auth(&to_ap, 1, 0, &mut buf).unwrap();
        assert_eq!(n, TX_HEADER_SIZE + MAC_HEADER_SIZE + 6);
        match parse_management(&buf[TX_HEADER_SIZE..n]).unwrap() {
            ManagementFrame::Authentication { header, algorithm, sequence, status } => {
                assert_eq!(header.addr1, AP);
                assert_eq!((algorithm, sequence, status), (0, 1, 0));
            }
            other => panic!("unexpected {:?}", other),
        }

        let n = build_assoc_request(&to_ap, caps::ESS, 1, b"home", &mut buf).unwrap();
        let body = &buf[TX_HEADER_SIZE + MAC_HEADER_SIZE..n];
        assert_eq!(InfoElements::new(&body[4..]).find_tag(eid::SSID), Some(&b"home"[..]));

        let n = build_assoc_response(&from_ap, 0, 7, &mut buf).unwrap();
        match parse_management(&buf[TX_HEADER_SIZE..n]).unwrap() {
            ManagementFrame::AssocResponse { status, aid, .. } => assert_eq!((status, aid), (0, 7)),
            other => panic!("unexpected {:?}", other),
        }

        let n = build_deauth(&from_ap, 3, &mut buf).unwrap();
        assert!(matches!(
            parse_management(&buf[TX_HEADER_SIZE..n]),
            Ok(ManagementFrame::Deauthentication { reason: 3, .. })
        ));
    }

    #[test]
    fn test_builders_report_small_buffers() {
        let mut buf = [0u8; 30];
        let addrs = MgmtAddrs { receiver: AP, transmitter: OWN, bssid: AP };
        assert_eq!(build_auth(&addrs, 1, 0, &mut buf), Err(FrameError::BufferTooSmall));
    }
}
