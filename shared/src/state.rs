//! # Shared Device State
//!
//! The single structure both processors see. Every field is an atomic
//! integer, so the all-zero bit pattern is a valid "freshly cleared" store
//! and the structure can be zero-allocated and handed over by address.
//!
//! ## Ownership
//!
//! ```text
//!              HostPort                         ControllerPort
//!   ┌──────────────────────────┐        ┌──────────────────────────┐
//!   │ HostWriter               │        │ ControllerWriter         │
//!   │  mode/channel/flags req  │        │  mac, status, bssid, aid │
//!   │  wep, ssid, target bssid │        │  applied mode/channel    │
//!   │  tx_out, rx_in           │        │  tx_in, rx_out           │
//!   │  host stats              │        │  controller stats, APs   │
//!   └────────────┬─────────────┘        └────────────┬─────────────┘
//!                │ RequestView ─────────────────────►│
//!                │◄───────────────────────── StatusView
//! ```
//!
//! A side can only obtain a writer for its own fields, so "one writer per
//! field" holds by construction. All access to the peer's fields goes
//! through [HostPort::observe] / [ControllerPort::observe], which
//! invalidate first; all writes go through `publish`/`commit`, which flush
//! afterwards.

use core::ops::Deref;
use core::sync::atomic::{fence, AtomicU16, AtomicU32, AtomicU8, Ordering};

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::ieee::MacAddr;
use crate::ring::{RingArena, RxFill, RxRing, TxDrain, TxRing, RX_HALFWORDS, TX_HALFWORDS};
use crate::traits::Notifier;

/// Maximum SSID length in bytes.
pub const MAX_SSID_LEN: usize = 32;
/// Longest WEP key (104-bit).
pub const MAX_WEP_KEY_LEN: usize = 13;
/// Number of access point slots.
pub const AP_TABLE_SIZE: usize = 16;
/// Lowest and highest valid channel.
pub const CHANNEL_MIN: u8 = 1;
pub const CHANNEL_MAX: u8 = 13;

/// Radio operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WifiMode {
    /// Transceiver off.
    #[default]
    Disabled = 0,
    /// Joined to (or joining) one network.
    Normal = 1,
    /// Listening for beacons, channel controlled by the host.
    Scan = 2,
}

impl TryFrom<u8> for WifiMode {
    type Error = RequestError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::Normal),
            2 => Ok(Self::Scan),
            other => Err(RequestError::InvalidMode(other)),
        }
    }
}

/// Legacy encryption setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WepMode {
    #[default]
    Off = 0,
    /// 40-bit key.
    Wep64 = 1,
    /// 104-bit key.
    Wep128 = 2,
}

impl WepMode {
    pub const fn key_len(self) -> usize {
        match self {
            Self::Off => 0,
            Self::Wep64 => 5,
            Self::Wep128 => 13,
        }
    }

    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

impl TryFrom<u8> for WepMode {
    type Error = RequestError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Wep64),
            2 => Ok(Self::Wep128),
            other => Err(RequestError::InvalidMode(other)),
        }
    }
}

/// Association progress, mirrored from the controller's engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AssocStatus {
    #[default]
    Disconnected = 0,
    Searching = 1,
    Authenticating = 2,
    Associating = 3,
    AcquiringAddress = 4,
    Associated = 5,
    CannotConnect = 6,
}

impl AssocStatus {
    /// No further progress without a new request.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Associated | Self::CannotConnect | Self::Disconnected)
    }
}

impl From<u8> for AssocStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Searching,
            2 => Self::Authenticating,
            3 => Self::Associating,
            4 => Self::AcquiringAddress,
            5 => Self::Associated,
            6 => Self::CannotConnect,
            _ => Self::Disconnected,
        }
    }
}

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* const $flag:ident = $value:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name(u8);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: Self = Self($value); )*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: u8) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> u8 {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other)
                } else {
                    self.remove(other)
                }
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!(stringify!($name), "({:#04x})"), self.0)
            }
        }
    };
}

flag_set! {
    /// Host request bits.
    pub struct RequestFlags {
        /// Pass every received frame up, not just data for us.
        const PROMISCUOUS = 0x01;
        /// Join the network named by ssid/target_bssid.
        const CONNECT = 0x02;
        /// The target is an independent (peer-to-peer) network.
        const ADHOC = 0x04;
        /// Hold the link in AcquiringAddress until ADDRESS_READY.
        const ACQUIRE_ADDRESS = 0x08;
        /// Host finished address configuration.
        const ADDRESS_READY = 0x10;
    }
}

flag_set! {
    /// Host liveness bits.
    pub struct HostFlags {
        const HOST_ACTIVE = 0x01;
        /// Host has seen the controller come up.
        const CONTROLLER_READY = 0x02;
        /// Network stack was told the link is up.
        const NET_UP = 0x04;
    }
}

flag_set! {
    /// Controller liveness bits.
    pub struct ControllerFlags {
        const ACTIVE = 0x01;
    }
}

flag_set! {
    /// Access point slot bits.
    pub struct ApFlags {
        /// Identity fields are complete.
        const VALID = 0x01;
        const WEP = 0x02;
        const ADHOC = 0x04;
    }
}

/// Counters written by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum HostStat {
    TxQueuedPackets = 0,
    TxQueuedBytes,
    TxNoSpace,
    RxDeliveredPackets,
    RxDeliveredBytes,
    RxDropped,
}

impl HostStat {
    pub const COUNT: usize = 6;
}

/// Counters written by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum ControllerStat {
    TxPackets = 0,
    TxBytes,
    TxErrors,
    RxPackets,
    RxBytes,
    RxOverflow,
}

impl ControllerStat {
    pub const COUNT: usize = 6;
}

/// Rejected request, reported before any field is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// Channel outside 1-13.
    InvalidChannel(u8),
    /// Channel changes are only accepted in normal or scan mode.
    ChannelNotAllowed(WifiMode),
    SsidTooLong(usize),
    /// Key length does not match the WEP mode.
    InvalidWepKey { expected: usize, actual: usize },
    /// Raw value is not a known mode.
    InvalidMode(u8),
}

impl core::fmt::Display for RequestError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidChannel(c) => write!(f, "channel {} outside {}-{}", c, CHANNEL_MIN, CHANNEL_MAX),
            Self::ChannelNotAllowed(mode) => write!(f, "channel cannot be changed in {:?} mode", mode),
            Self::SsidTooLong(len) => write!(f, "ssid of {} bytes exceeds {}", len, MAX_SSID_LEN),
            Self::InvalidWepKey { expected, actual } => {
                write!(f, "wep key of {} bytes, expected {}", actual, expected)
            }
            Self::InvalidMode(v) => write!(f, "unknown mode value {}", v),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RequestError {}

/// Validated network name, at most [MAX_SSID_LEN] bytes.
#[derive(Clone, PartialEq, Eq, Default, Hash)]
pub struct Ssid(Vec<u8, MAX_SSID_LEN>);

impl Ssid {
    pub fn new(bytes: &[u8]) -> Result<Self, RequestError> {
        Vec::from_slice(bytes)
            .map(Self)
            .map_err(|_| RequestError::SsidTooLong(bytes.len()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&str> for Ssid {
    type Error = RequestError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.as_bytes())
    }
}

impl core::fmt::Debug for Ssid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Ssid(\"{}\")", self)
    }
}

impl core::fmt::Display for Ssid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for chunk in self.0.utf8_chunks() {
            f.write_str(chunk.valid())?;
            for b in chunk.invalid() {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Ssid {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=[u8]:a}", self.as_bytes())
    }
}

/// One entry of the access point table, as read by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccessPoint {
    pub bssid: MacAddr,
    pub ssid: Ssid,
    pub channel: u8,
    /// Signal quality of the last frame seen from it.
    pub quality: u8,
    pub flags: ApFlags,
}

/// Shared slot for one access point.
///
/// Identity fields are written before VALID and never rewritten, only
/// `channel` and `quality` change afterwards.
struct ApSlot {
    flags: AtomicU8,
    bssid: [AtomicU8; 6],
    ssid_len: AtomicU8,
    ssid: [AtomicU8; MAX_SSID_LEN],
    channel: AtomicU8,
    quality: AtomicU8,
}

impl ApSlot {
    const fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            bssid: [const { AtomicU8::new(0) }; 6],
            ssid_len: AtomicU8::new(0),
            ssid: [const { AtomicU8::new(0) }; MAX_SSID_LEN],
            channel: AtomicU8::new(0),
            quality: AtomicU8::new(0),
        }
    }

    fn flags(&self) -> ApFlags {
        ApFlags::from_bits(self.flags.load(Ordering::Relaxed))
    }

    fn bssid(&self) -> MacAddr {
        MacAddr(load_bytes(&self.bssid))
    }

    fn snapshot(&self) -> Option<AccessPoint> {
        let flags = self.flags();
        if !flags.contains(ApFlags::VALID) {
            return None;
        }
        let len = (self.ssid_len.load(Ordering::Relaxed) as usize).min(MAX_SSID_LEN);
        let raw: [u8; MAX_SSID_LEN] = load_bytes(&self.ssid);
        Some(AccessPoint {
            bssid: self.bssid(),
            ssid: Ssid::new(&raw[..len]).unwrap_or_default(),
            channel: self.channel.load(Ordering::Relaxed),
            quality: self.quality.load(Ordering::Relaxed),
            flags,
        })
    }
}

fn load_bytes<const N: usize>(cells: &[AtomicU8; N]) -> [u8; N] {
    let mut out = [0u8; N];
    for (o, c) in out.iter_mut().zip(cells) {
        *o = c.load(Ordering::Relaxed);
    }
    out
}

fn store_bytes(cells: &[AtomicU8], bytes: &[u8]) {
    for (c, b) in cells.iter().zip(bytes) {
        c.store(*b, Ordering::Relaxed);
    }
}

/// The shared device state.
pub struct SharedState {
    // Identity, written once by the controller at bind.
    mac: [AtomicU8; 6],

    // Host-owned requests.
    req_mode: AtomicU8,
    req_channel: AtomicU8,
    req_flags: AtomicU8,
    req_wep_mode: AtomicU8,
    req_wep_key: [AtomicU8; MAX_WEP_KEY_LEN],
    req_ssid_len: AtomicU8,
    req_ssid: [AtomicU8; MAX_SSID_LEN],
    req_bssid: [AtomicU8; 6],
    req_max_guests: AtomicU8,
    req_connect_seq: AtomicU8,
    host_flags: AtomicU8,
    host_stats: [AtomicU32; HostStat::COUNT],
    tx_out: AtomicU16,
    rx_in: AtomicU16,

    // Controller-owned status.
    cur_mode: AtomicU8,
    cur_channel: AtomicU8,
    cur_flags: AtomicU8,
    cur_wep_mode: AtomicU8,
    status: AtomicU8,
    cur_connect_seq: AtomicU8,
    bssid: [AtomicU8; 6],
    aid: AtomicU16,
    ctrl_flags: AtomicU8,
    ctrl_stats: [AtomicU32; ControllerStat::COUNT],
    tx_in: AtomicU16,
    rx_out: AtomicU16,
    ap_table: [ApSlot; AP_TABLE_SIZE],

    tx_arena: RingArena<TX_HALFWORDS>,
    rx_arena: RingArena<RX_HALFWORDS>,
}

impl SharedState {
    /// A cleared store. Equivalent to zero-filled memory.
    pub const fn new() -> Self {
        Self {
            mac: [const { AtomicU8::new(0) }; 6],
            req_mode: AtomicU8::new(0),
            req_channel: AtomicU8::new(0),
            req_flags: AtomicU8::new(0),
            req_wep_mode: AtomicU8::new(0),
            req_wep_key: [const { AtomicU8::new(0) }; MAX_WEP_KEY_LEN],
            req_ssid_len: AtomicU8::new(0),
            req_ssid: [const { AtomicU8::new(0) }; MAX_SSID_LEN],
            req_bssid: [const { AtomicU8::new(0) }; 6],
            req_max_guests: AtomicU8::new(0),
            req_connect_seq: AtomicU8::new(0),
            host_flags: AtomicU8::new(0),
            host_stats: [const { AtomicU32::new(0) }; HostStat::COUNT],
            tx_out: AtomicU16::new(0),
            rx_in: AtomicU16::new(0),
            cur_mode: AtomicU8::new(0),
            cur_channel: AtomicU8::new(0),
            cur_flags: AtomicU8::new(0),
            cur_wep_mode: AtomicU8::new(0),
            status: AtomicU8::new(0),
            cur_connect_seq: AtomicU8::new(0),
            bssid: [const { AtomicU8::new(0) }; 6],
            aid: AtomicU16::new(0),
            ctrl_flags: AtomicU8::new(0),
            ctrl_stats: [const { AtomicU32::new(0) }; ControllerStat::COUNT],
            tx_in: AtomicU16::new(0),
            rx_out: AtomicU16::new(0),
            ap_table: [const { ApSlot::new() }; AP_TABLE_SIZE],
            tx_arena: RingArena::new(),
            rx_arena: RingArena::new(),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Which half of the store a barrier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Region {
    /// Host-owned fields and the TX arena.
    Host,
    /// Controller-owned fields and the RX arena.
    Controller,
}

/// Cache maintenance for a non-coherent view of the store.
pub trait CacheMaintenance {
    /// Write back local modifications of `region`.
    fn flush(&self, region: Region);
    /// Discard stale local copies of `region`.
    fn invalidate(&self, region: Region);
}

/// Coherent memory: barriers reduce to fences.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coherent;

impl CacheMaintenance for Coherent {
    fn flush(&self, _region: Region) {
        fence(Ordering::Release);
    }

    fn invalidate(&self, _region: Region) {
        fence(Ordering::Acquire);
    }
}

/// Read access to host-owned fields.
pub struct RequestView<'a> {
    s: &'a SharedState,
}

impl<'a> RequestView<'a> {
    pub fn mode(&self) -> WifiMode {
        WifiMode::try_from(self.s.req_mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn channel(&self) -> u8 {
        self.s.req_channel.load(Ordering::Relaxed)
    }

    pub fn flags(&self) -> RequestFlags {
        RequestFlags::from_bits(self.s.req_flags.load(Ordering::Relaxed))
    }

    pub fn wep_mode(&self) -> WepMode {
        WepMode::try_from(self.s.req_wep_mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn wep_key(&self) -> Vec<u8, MAX_WEP_KEY_LEN> {
        let raw: [u8; MAX_WEP_KEY_LEN] = load_bytes(&self.s.req_wep_key);
        let len = self.wep_mode().key_len();
        Vec::from_slice(&raw[..len]).unwrap_or_default()
    }

    pub fn ssid(&self) -> Ssid {
        let len = (self.s.req_ssid_len.load(Ordering::Relaxed) as usize).min(MAX_SSID_LEN);
        let raw: [u8; MAX_SSID_LEN] = load_bytes(&self.s.req_ssid);
        Ssid::new(&raw[..len]).unwrap_or_default()
    }

    pub fn target_bssid(&self) -> MacAddr {
        MacAddr(load_bytes(&self.s.req_bssid))
    }

    pub fn max_guests(&self) -> u8 {
        self.s.req_max_guests.load(Ordering::Relaxed)
    }

    /// Bumped by every connect request, so a repeated request is
    /// distinguishable from a stale CONNECT flag.
    pub fn connect_seq(&self) -> u8 {
        self.s.req_connect_seq.load(Ordering::Relaxed)
    }

    pub fn host_flags(&self) -> HostFlags {
        HostFlags::from_bits(self.s.host_flags.load(Ordering::Relaxed))
    }

    pub fn stat(&self, stat: HostStat) -> u32 {
        self.s.host_stats[stat as usize].load(Ordering::Relaxed)
    }
}

/// Read access to controller-owned fields.
pub struct StatusView<'a> {
    s: &'a SharedState,
}

impl<'a> StatusView<'a> {
    pub fn mac_address(&self) -> MacAddr {
        MacAddr(load_bytes(&self.s.mac))
    }

    pub fn mode(&self) -> WifiMode {
        WifiMode::try_from(self.s.cur_mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn channel(&self) -> u8 {
        self.s.cur_channel.load(Ordering::Relaxed)
    }

    /// Request flags as last applied by the controller.
    pub fn flags(&self) -> RequestFlags {
        RequestFlags::from_bits(self.s.cur_flags.load(Ordering::Relaxed))
    }

    pub fn wep_mode(&self) -> WepMode {
        WepMode::try_from(self.s.cur_wep_mode.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn assoc_status(&self) -> AssocStatus {
        AssocStatus::from(self.s.status.load(Ordering::Relaxed))
    }

    /// The connect request [assoc_status](Self::assoc_status) refers to.
    pub fn connect_seq(&self) -> u8 {
        self.s.cur_connect_seq.load(Ordering::Relaxed)
    }

    pub fn bssid(&self) -> MacAddr {
        MacAddr(load_bytes(&self.s.bssid))
    }

    pub fn aid(&self) -> u16 {
        self.s.aid.load(Ordering::Relaxed)
    }

    pub fn controller_flags(&self) -> ControllerFlags {
        ControllerFlags::from_bits(self.s.ctrl_flags.load(Ordering::Relaxed))
    }

    pub fn is_active(&self) -> bool {
        self.controller_flags().contains(ControllerFlags::ACTIVE)
    }

    pub fn stat(&self, stat: ControllerStat) -> u32 {
        self.s.ctrl_stats[stat as usize].load(Ordering::Relaxed)
    }

    /// Valid entries of the access point table.
    pub fn access_points(&self) -> impl Iterator<Item = AccessPoint> + 'a {
        self.s.ap_table.iter().filter_map(ApSlot::snapshot)
    }
}

/// Write access to host-owned fields.
pub struct HostWriter<'a> {
    s: &'a SharedState,
}

impl<'a> HostWriter<'a> {
    /// Host-owned fields as currently written.
    pub fn requests(&self) -> RequestView<'a> {
        RequestView { s: self.s }
    }

    pub fn set_mode(&self, mode: WifiMode) {
        self.s.req_mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn set_channel(&self, channel: u8) -> Result<(), RequestError> {
        if !(CHANNEL_MIN..=CHANNEL_MAX).contains(&channel) {
            return Err(RequestError::InvalidChannel(channel));
        }
        self.s.req_channel.store(channel, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_flags(&self, flags: RequestFlags) {
        self.s.req_flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn update_flags(&self, f: impl FnOnce(&mut RequestFlags)) {
        let mut flags = self.requests().flags();
        f(&mut flags);
        self.set_flags(flags);
    }

    pub fn set_wep(&self, mode: WepMode, key: &[u8]) -> Result<(), RequestError> {
        if key.len() != mode.key_len() {
            return Err(RequestError::InvalidWepKey {
                expected: mode.key_len(),
                actual: key.len(),
            });
        }
        store_bytes(&self.s.req_wep_key, key);
        self.s.req_wep_mode.store(mode as u8, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_ssid(&self, ssid: &Ssid) {
        store_bytes(&self.s.req_ssid, ssid.as_bytes());
        self.s.req_ssid_len.store(ssid.len() as u8, Ordering::Relaxed);
    }

    pub fn set_target_bssid(&self, bssid: MacAddr) {
        store_bytes(&self.s.req_bssid, bssid.as_bytes());
    }

    pub fn set_max_guests(&self, guests: u8) {
        self.s.req_max_guests.store(guests, Ordering::Relaxed);
    }

    /// Set CONNECT and start a new connect request.
    pub fn request_connect(&self) {
        self.update_flags(|f| f.insert(RequestFlags::CONNECT));
        let seq = self.requests().connect_seq().wrapping_add(1);
        self.s.req_connect_seq.store(seq, Ordering::Relaxed);
    }

    pub fn update_host_flags(&self, f: impl FnOnce(&mut HostFlags)) {
        let mut flags = self.requests().host_flags();
        f(&mut flags);
        self.s.host_flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn add_stat(&self, stat: HostStat, n: u32) {
        let cell = &self.s.host_stats[stat as usize];
        cell.store(cell.load(Ordering::Relaxed).wrapping_add(n), Ordering::Relaxed);
    }

    pub fn tx_ring(&self) -> TxRing<'a, RingArena<TX_HALFWORDS>> {
        TxRing::new(&self.s.tx_arena, &self.s.tx_out, &self.s.tx_in)
    }

    pub fn rx_ring(&self) -> RxRing<'a, RingArena<RX_HALFWORDS>> {
        RxRing::new(&self.s.rx_arena, &self.s.rx_in, &self.s.rx_out)
    }
}

/// Write access to controller-owned fields.
pub struct ControllerWriter<'a> {
    s: &'a SharedState,
}

impl<'a> ControllerWriter<'a> {
    /// Controller-owned fields as currently written.
    pub fn status(&self) -> StatusView<'a> {
        StatusView { s: self.s }
    }

    pub fn set_mac_address(&self, mac: MacAddr) {
        store_bytes(&self.s.mac, mac.as_bytes());
    }

    pub fn set_mode(&self, mode: WifiMode) {
        self.s.cur_mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn set_channel(&self, channel: u8) {
        self.s.cur_channel.store(channel, Ordering::Relaxed);
    }

    pub fn set_flags(&self, flags: RequestFlags) {
        self.s.cur_flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn set_wep_mode(&self, mode: WepMode) {
        self.s.cur_wep_mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn set_assoc_status(&self, status: AssocStatus) {
        self.s.status.store(status as u8, Ordering::Relaxed);
    }

    pub fn set_connect_seq(&self, seq: u8) {
        self.s.cur_connect_seq.store(seq, Ordering::Relaxed);
    }

    pub fn set_bssid(&self, bssid: MacAddr) {
        store_bytes(&self.s.bssid, bssid.as_bytes());
    }

    pub fn set_aid(&self, aid: u16) {
        self.s.aid.store(aid, Ordering::Relaxed);
    }

    pub fn update_controller_flags(&self, f: impl FnOnce(&mut ControllerFlags)) {
        let mut flags = self.status().controller_flags();
        f(&mut flags);
        self.s.ctrl_flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn add_stat(&self, stat: ControllerStat, n: u32) {
        let cell = &self.s.ctrl_stats[stat as usize];
        cell.store(cell.load(Ordering::Relaxed).wrapping_add(n), Ordering::Relaxed);
    }

    /// Insert or refresh an access point. Returns false when the table is
    /// full and `bssid` is not in it.
    pub fn record_access_point(
        &self,
        bssid: MacAddr,
        ssid: &Ssid,
        channel: u8,
        quality: u8,
        flags: ApFlags,
    ) -> bool {
        let table = &self.s.ap_table;
        if let Some(slot) = table
            .iter()
            .find(|slot| slot.flags().contains(ApFlags::VALID) && slot.bssid() == bssid)
        {
            slot.channel.store(channel, Ordering::Relaxed);
            slot.quality.store(quality, Ordering::Relaxed);
            return true;
        }
        let Some(slot) = table.iter().find(|slot| !slot.flags().contains(ApFlags::VALID)) else {
            return false;
        };
        store_bytes(&slot.bssid, bssid.as_bytes());
        store_bytes(&slot.ssid, ssid.as_bytes());
        slot.ssid_len.store(ssid.len() as u8, Ordering::Relaxed);
        slot.channel.store(channel, Ordering::Relaxed);
        slot.quality.store(quality, Ordering::Relaxed);
        let mut flags = flags;
        flags.insert(ApFlags::VALID);
        // VALID goes last so readers never see a half-written identity.
        fence(Ordering::Release);
        slot.flags.store(flags.bits(), Ordering::Relaxed);
        true
    }

    /// Drop every access point entry.
    pub fn clear_access_points(&self) {
        for slot in &self.s.ap_table {
            slot.flags.store(0, Ordering::Relaxed);
        }
    }

    pub fn tx_drain(&self) -> TxDrain<'a, RingArena<TX_HALFWORDS>> {
        TxDrain::new(&self.s.tx_arena, &self.s.tx_in, &self.s.tx_out)
    }

    pub fn rx_fill(&self) -> RxFill<'a, RingArena<RX_HALFWORDS>> {
        RxFill::new(&self.s.rx_arena, &self.s.rx_out, &self.s.rx_in)
    }
}

/// The host's handle on the store.
pub struct HostPort<S, C = Coherent> {
    state: S,
    cache: C,
}

impl<S: Deref<Target = SharedState>> HostPort<S, Coherent> {
    pub fn new(state: S) -> Self {
        Self::with_cache(state, Coherent)
    }
}

impl<S: Deref<Target = SharedState>, C: CacheMaintenance> HostPort<S, C> {
    pub fn with_cache(state: S, cache: C) -> Self {
        Self { state, cache }
    }

    /// Underlying store handle, for handing to the peer.
    pub fn handle(&self) -> &S {
        &self.state
    }

    /// Invalidate, write, flush, then notify the controller.
    pub fn publish<R>(&self, notifier: &impl Notifier, f: impl FnOnce(&HostWriter<'_>) -> R) -> R {
        let result = self.commit(f);
        notifier.notify_peer();
        result
    }

    /// Invalidate, write, flush. The controller sees it on its next sync.
    pub fn commit<R>(&self, f: impl FnOnce(&HostWriter<'_>) -> R) -> R {
        self.cache.invalidate(Region::Controller);
        let result = f(&HostWriter { s: &*self.state });
        self.cache.flush(Region::Host);
        result
    }

    /// Invalidate, then read controller-owned fields.
    pub fn observe<R>(&self, f: impl FnOnce(&StatusView<'_>) -> R) -> R {
        self.cache.invalidate(Region::Controller);
        f(&StatusView { s: &*self.state })
    }

    /// Host-owned fields; no barrier needed.
    pub fn requests(&self) -> RequestView<'_> {
        RequestView { s: &*self.state }
    }
}

/// The controller's handle on the store.
pub struct ControllerPort<S, C = Coherent> {
    state: S,
    cache: C,
}

impl<S: Deref<Target = SharedState>> ControllerPort<S, Coherent> {
    pub fn new(state: S) -> Self {
        Self::with_cache(state, Coherent)
    }
}

impl<S: Deref<Target = SharedState>, C: CacheMaintenance> ControllerPort<S, C> {
    pub fn with_cache(state: S, cache: C) -> Self {
        Self { state, cache }
    }

    /// Invalidate, write, flush, then notify the host.
    pub fn publish<R>(
        &self,
        notifier: &impl Notifier,
        f: impl FnOnce(&ControllerWriter<'_>) -> R,
    ) -> R {
        let result = self.commit(f);
        notifier.notify_peer();
        result
    }

    /// Invalidate, write, flush.
    pub fn commit<R>(&self, f: impl FnOnce(&ControllerWriter<'_>) -> R) -> R {
        self.cache.invalidate(Region::Host);
        let result = f(&ControllerWriter { s: &*self.state });
        self.cache.flush(Region::Controller);
        result
    }

    /// Invalidate, then read host-owned fields.
    pub fn observe<R>(&self, f: impl FnOnce(&RequestView<'_>) -> R) -> R {
        self.cache.invalidate(Region::Host);
        f(&RequestView { s: &*self.state })
    }

    /// Controller-owned fields; no barrier needed.
    pub fn status(&self) -> StatusView<'_> {
        StatusView { s: &*self.state }
    }
}

/// Counter snapshot across both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub tx_queued_packets: u32,
    pub tx_queued_bytes: u32,
    pub tx_no_space: u32,
    pub rx_delivered_packets: u32,
    pub rx_delivered_bytes: u32,
    pub rx_dropped: u32,
    pub tx_packets: u32,
    pub tx_bytes: u32,
    pub tx_errors: u32,
    pub rx_packets: u32,
    pub rx_bytes: u32,
    pub rx_overflow: u32,
}

impl Stats {
    pub fn collect(requests: &RequestView<'_>, status: &StatusView<'_>) -> Self {
        Self {
            tx_queued_packets: requests.stat(HostStat::TxQueuedPackets),
            tx_queued_bytes: requests.stat(HostStat::TxQueuedBytes),
            tx_no_space: requests.stat(HostStat::TxNoSpace),
            rx_delivered_packets: requests.stat(HostStat::RxDeliveredPackets),
            rx_delivered_bytes: requests.stat(HostStat::RxDeliveredBytes),
            rx_dropped: requests.stat(HostStat::RxDropped),
            tx_packets: status.stat(ControllerStat::TxPackets),
            tx_bytes: status.stat(ControllerStat::TxBytes),
            tx_errors: status.stat(ControllerStat::TxErrors),
            rx_packets: status.stat(ControllerStat::RxPackets),
            rx_bytes: status.stat(ControllerStat::RxBytes),
            rx_overflow: status.stat(ControllerStat::RxOverflow),
        }
    }
}
