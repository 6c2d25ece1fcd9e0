//! # Hardware-Facing Controller
//!
//! The loop that runs next to the radio. It owns the association engine and
//! is the only writer of status fields, `tx_in` and `rx_out`.
//!
//! ## Entry Points
//!
//! ```text
//!  bridge ──► handle_message ──┬─ Address ─► bind
//!                              ├─ Enable/Disable ─► radio power
//!                              └─ Sync ─► update
//!  timer  ──► tick ───────────► engine Tick + update
//!  radio  ──► on_frame_received ─► engine events, AP table, RX ring
//! ```
//!
//! `update` observes the host's requests, applies what changed, drains a
//! bounded number of frames from the TX ring and publishes status. The host
//! is notified only when something it can see actually changed.

use core::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::assoc::{Action, Actions, AssociationEngine, Event, State, Target, Timeouts, REASON_LEAVING};
use crate::frame::{
    build_assoc_request, build_auth, build_deauth, parse_management, patch_beacon_channel,
    ManagementFrame, MgmtAddrs, MGMT_MAX_LEN,
};
use crate::ieee::{caps, fc, MacAddr, MacHeader, TxHeader, TxRate, TX_HEADER_SIZE};
use crate::ipc::{IpcMessage, Signal};
use crate::state::{
    ApFlags, AssocStatus, CacheMaintenance, Coherent, ControllerFlags, ControllerPort,
    ControllerStat, RequestFlags, RequestView, Ssid, WepMode, WifiMode, CHANNEL_MAX, CHANNEL_MIN,
    MAX_WEP_KEY_LEN,
};
use crate::traits::{Notifier, Radio};
use crate::MAX_FRAME_LEN;

/// Controller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub timeouts: Timeouts,
    /// Frames handed to the radio per update.
    pub tx_drain_cap: usize,
    /// Listen interval announced in association requests.
    pub listen_interval: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            tx_drain_cap: 8,
            listen_interval: 1,
        }
    }
}

/// Radio settings as last applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Applied {
    mode: WifiMode,
    channel: u8,
    flags: RequestFlags,
    wep_mode: WepMode,
    wep_key: heapless::Vec<u8, MAX_WEP_KEY_LEN>,
    connect_seq: u8,
}

/// Everything mirrored into the controller-owned status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Published {
    mode: WifiMode,
    channel: u8,
    flags: RequestFlags,
    wep_mode: WepMode,
    status: AssocStatus,
    connect_seq: u8,
    bssid: MacAddr,
    aid: u16,
}

pub struct Controller<S, R, N, C = Coherent> {
    port: Option<ControllerPort<S, C>>,
    cache: C,
    radio: R,
    notifier: N,
    engine: AssociationEngine,
    config: ControllerConfig,
    own: MacAddr,
    applied: Applied,
    /// Target of the current connect request.
    target: Target,
    published: Option<Published>,
    scratch: [u8; MAX_FRAME_LEN],
}

impl<S, R, N> Controller<S, R, N, Coherent>
where
    S: Deref<Target = crate::state::SharedState>,
    R: Radio,
    N: Notifier,
{
    pub fn new(radio: R, notifier: N, config: ControllerConfig) -> Self {
        Self::with_cache(radio, notifier, config, Coherent)
    }
}

impl<S, R, N, C> Controller<S, R, N, C>
where
    S: Deref<Target = crate::state::SharedState>,
    R: Radio,
    N: Notifier,
    C: CacheMaintenance + Clone,
{
    pub fn with_cache(radio: R, notifier: N, config: ControllerConfig, cache: C) -> Self {
        let own = radio.mac_address();
        Self {
            port: None,
            cache,
            radio,
            notifier,
            engine: AssociationEngine::new(config.timeouts),
            config,
            own,
            applied: Applied::default(),
            target: Target::default(),
            published: None,
            scratch: [0; MAX_FRAME_LEN],
        }
    }

    pub fn is_bound(&self) -> bool {
        self.port.is_some()
    }

    pub fn state(&self) -> &State {
        self.engine.state()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// React to one message from the host.
    pub fn handle_message(&mut self, message: IpcMessage<S>) {
        match message {
            IpcMessage::Address(handle) => self.bind(handle),
            IpcMessage::Value(value) => match Signal::try_from(value) {
                Ok(Signal::Enable) => self.radio.set_enabled(true),
                Ok(Signal::Disable) => self.radio.set_enabled(false),
                Ok(Signal::Sync) => self.update(),
                Err(other) => warn!("controller: unknown signal {}", other),
            },
        }
    }

    /// Attach to the shared state, write identity and mark ACTIVE.
    pub fn bind(&mut self, handle: S) {
        if self.port.is_some() {
            warn!("controller: already bound, ignoring address");
            return;
        }
        let port = ControllerPort::with_cache(handle, self.cache.clone());
        let own = self.own;
        port.publish(&self.notifier, |w| {
            w.set_mac_address(own);
            w.set_assoc_status(AssocStatus::Disconnected);
            w.update_controller_flags(|f| f.insert(ControllerFlags::ACTIVE));
        });
        info!("controller: bound, mac {}", own);
        self.port = Some(port);
    }

    /// Timer entry point.
    pub fn tick(&mut self) {
        if self.port.is_none() {
            return;
        }
        let actions = self.engine.handle(Event::Tick);
        self.run(actions);
        self.update();
    }

    /// Sync entry point: apply requests, drain TX, publish status.
    pub fn update(&mut self) {
        let Some(port) = &self.port else {
            return;
        };
        let requests = port.observe(Requests::read);

        self.apply_requests(&requests);
        let drained = self.drain_tx();
        self.publish(drained);
    }

    /// Interrupt entry point for one received frame (MAC header onwards).
    pub fn on_frame_received(&mut self, rate_quality: u16, frame: &[u8]) {
        if self.port.is_none() || self.applied.mode == WifiMode::Disabled {
            return;
        }
        let Some(header) = MacHeader::decode(frame) else {
            return;
        };
        let mut deliver = self.applied.flags.contains(RequestFlags::PROMISCUOUS);

        if header.frame_control & fc::TYPE_MASK == fc::TYPE_MANAGEMENT {
            if let Some(event) = self.management_event(rate_quality, frame) {
                let actions = self.engine.handle(event);
                self.run(actions);
            }
        } else if header.frame_control & fc::TYPE_MASK == fc::TYPE_DATA {
            deliver = true;
        }

        if deliver {
            if let Some(port) = &self.port {
                port.commit(|w| match w.rx_fill().push(rate_quality, frame) {
                    Ok(()) => {
                        w.add_stat(ControllerStat::RxPackets, 1);
                        w.add_stat(ControllerStat::RxBytes, frame.len() as u32);
                    }
                    Err(_) => w.add_stat(ControllerStat::RxOverflow, 1),
                });
            }
        }
        self.publish(deliver);
    }

    fn management_event(&self, rate_quality: u16, frame: &[u8]) -> Option<Event> {
        let for_us = |h: &MacHeader| h.addr1 == self.own || h.addr1.is_broadcast();
        match parse_management(frame).ok()? {
            ManagementFrame::Beacon(info) | ManagementFrame::ProbeResponse(info) => {
                let ssid = Ssid::new(info.ssid).ok()?;
                let channel = info.channel.unwrap_or(self.applied.channel);
                let mut flags = ApFlags::empty();
                flags.set(ApFlags::WEP, info.is_protected());
                flags.set(ApFlags::ADHOC, info.is_adhoc());
                if let Some(port) = &self.port {
                    let quality = (rate_quality >> 8) as u8;
                    port.commit(|w| w.record_access_point(info.bssid, &ssid, channel, quality, flags));
                }
                Some(Event::NetworkFound {
                    bssid: info.bssid,
                    ssid,
                    channel,
                })
            }
            ManagementFrame::Authentication {
                header,
                sequence,
                status,
                ..
            } if header.addr1 == self.own && sequence == 2 => Some(Event::AuthResponse {
                from: header.addr2,
                status,
            }),
            ManagementFrame::AssocResponse { header, status, aid } if header.addr1 == self.own => {
                Some(Event::AssocResponse {
                    from: header.addr2,
                    status,
                    aid,
                })
            }
            ManagementFrame::Deauthentication { header, reason } if for_us(&header) => {
                debug!("controller: deauthenticated by {}, reason {}", header.addr2, reason);
                Some(Event::Deauthenticated { from: header.addr2 })
            }
            ManagementFrame::Disassociation { header, reason } if for_us(&header) => {
                debug!("controller: disassociated by {}, reason {}", header.addr2, reason);
                Some(Event::Disassociated { from: header.addr2 })
            }
            _ => None,
        }
    }

    fn apply_requests(&mut self, requests: &Requests) {
        if requests.mode != self.applied.mode {
            info!("controller: mode {:?} -> {:?}", self.applied.mode, requests.mode);
            self.radio.set_enabled(requests.mode != WifiMode::Disabled);
            self.applied.mode = requests.mode;
            if requests.mode == WifiMode::Disabled {
                let actions = self.engine.handle(Event::Disconnect);
                self.run(actions);
            }
            // A new scan starts from an empty table.
            if requests.mode == WifiMode::Scan {
                if let Some(port) = &self.port {
                    port.commit(|w| w.clear_access_points());
                }
            }
        }

        let promiscuous = requests.flags.contains(RequestFlags::PROMISCUOUS);
        if promiscuous != self.applied.flags.contains(RequestFlags::PROMISCUOUS) {
            self.radio.set_promiscuous(promiscuous);
        }

        if requests.wep_mode != self.applied.wep_mode || requests.wep_key != self.applied.wep_key {
            self.radio.set_wep(requests.wep_mode, &requests.wep_key);
            self.applied.wep_mode = requests.wep_mode;
            self.applied.wep_key = requests.wep_key.clone();
        }

        // The engine owns the channel while it is joining or joined.
        let joining = !matches!(self.engine.state(), State::Disconnected | State::CannotConnect(_));
        let channel_ok = (CHANNEL_MIN..=CHANNEL_MAX).contains(&requests.channel);
        if !joining
            && channel_ok
            && requests.mode != WifiMode::Disabled
            && requests.channel != self.applied.channel
        {
            self.set_channel(requests.channel);
        }

        let connect = requests.flags.contains(RequestFlags::CONNECT);
        let was_connect = self.applied.flags.contains(RequestFlags::CONNECT);
        if connect && requests.mode != WifiMode::Disabled {
            if !was_connect || requests.connect_seq != self.applied.connect_seq {
                self.target = Target {
                    ssid: requests.ssid.clone(),
                    bssid: requests.target_bssid,
                    adhoc: requests.flags.contains(RequestFlags::ADHOC),
                    acquire_address: requests.flags.contains(RequestFlags::ACQUIRE_ADDRESS),
                };
                info!("controller: connect to {} ({})", self.target.ssid, self.target.bssid);
                let actions = self.engine.handle(Event::Connect(self.target.clone()));
                self.run(actions);
            }
        } else if was_connect {
            let actions = self.engine.handle(Event::Disconnect);
            self.run(actions);
        }
        self.applied.connect_seq = requests.connect_seq;

        if requests.flags.contains(RequestFlags::ADDRESS_READY)
            && matches!(self.engine.state(), State::AcquiringAddress { .. })
        {
            let actions = self.engine.handle(Event::AddressAcquired);
            self.run(actions);
        }

        self.applied.flags = requests.flags;
    }

    fn set_channel(&mut self, channel: u8) {
        debug!("controller: channel {}", channel);
        self.radio.set_channel(channel);
        self.applied.channel = channel;
    }

    fn run(&mut self, actions: Actions) {
        for action in actions {
            match action {
                Action::SetChannel(channel) => self.set_channel(channel),
                Action::SendAuthRequest { bssid } => {
                    let addrs = self.addrs_to(bssid);
                    self.send_management(|out| build_auth(&addrs, 1, 0, out));
                }
                Action::SendAssocRequest { bssid, ssid } => {
                    let addrs = self.addrs_to(bssid);
                    let mut capability = caps::ESS | caps::SHORT_PREAMBLE;
                    if self.applied.wep_mode.is_enabled() {
                        capability |= caps::PRIVACY;
                    }
                    let listen = self.config.listen_interval;
                    self.send_management(|out| {
                        build_assoc_request(&addrs, capability, listen, ssid.as_bytes(), out)
                    });
                }
                Action::SendDeauth { bssid } => {
                    let addrs = self.addrs_to(bssid);
                    self.send_management(|out| build_deauth(&addrs, REASON_LEAVING, out));
                }
                Action::LinkUp { bssid, aid } => info!("controller: link up, bssid {} aid {}", bssid, aid),
                Action::LinkDown => info!("controller: link down"),
            }
        }
    }

    fn addrs_to(&self, bssid: MacAddr) -> MgmtAddrs {
        MgmtAddrs {
            receiver: bssid,
            transmitter: self.own,
            bssid,
        }
    }

    fn send_management(
        &mut self,
        build: impl FnOnce(&mut [u8]) -> Result<usize, crate::frame::FrameError>,
    ) {
        let mut buf = [0u8; MGMT_MAX_LEN];
        match build(&mut buf) {
            Ok(len) => {
                if self.radio.transmit(&buf[..len]).is_err() {
                    warn!("controller: management tx failed");
                }
            }
            Err(err) => error!("controller: cannot build management frame: {:?}", err),
        }
    }

    /// Hand up to `tx_drain_cap` queued frames to the radio. Returns true
    /// if the TX cursor moved.
    fn drain_tx(&mut self) -> bool {
        let Some(port) = &self.port else {
            return false;
        };
        let radio = &mut self.radio;
        let scratch = &mut self.scratch;
        let channel = self.applied.channel;
        let enabled = self.applied.mode != WifiMode::Disabled;
        let cap = self.config.tx_drain_cap;

        port.commit(|w| {
            let drain = w.tx_drain();
            if !drain.pending() {
                return false;
            }
            if !enabled {
                drain.discard_all();
                return true;
            }
            for _ in 0..cap {
                if !drain.pending() {
                    break;
                }
                let Some(span) = drain.read_frame(scratch) else {
                    error!("controller: corrupt TX queue, dropping {} bytes", drain.queued_bytes());
                    w.add_stat(ControllerStat::TxErrors, 1);
                    drain.discard_all();
                    break;
                };
                let frame = &mut scratch[..span];
                if let Some(mut header) = TxHeader::decode(frame) {
                    if header.rate == 0 {
                        header.rate = TxRate::Mbps2 as u16;
                        frame[..TX_HEADER_SIZE].copy_from_slice(&header.encode());
                    }
                }
                patch_beacon_channel(&mut frame[TX_HEADER_SIZE..], channel);
                match radio.transmit(frame) {
                    Ok(()) => {
                        w.add_stat(ControllerStat::TxPackets, 1);
                        w.add_stat(ControllerStat::TxBytes, span as u32);
                    }
                    Err(_) => {
                        warn!("controller: tx of {} bytes failed", span);
                        w.add_stat(ControllerStat::TxErrors, 1);
                    }
                }
                drain.advance(span);
            }
            true
        })
    }

    /// Write status fields and notify the host if they changed or `dirty`.
    fn publish(&mut self, dirty: bool) {
        let Some(port) = &self.port else {
            return;
        };
        let state = self.engine.state();
        let aid = match state {
            State::AcquiringAddress { aid, .. } | State::Associated { aid, .. } => *aid,
            _ => 0,
        };
        let current = Published {
            mode: self.applied.mode,
            channel: self.applied.channel,
            flags: self.applied.flags,
            wep_mode: self.applied.wep_mode,
            status: state.status(),
            connect_seq: self.applied.connect_seq,
            bssid: state.bss().map(|b| b.bssid).unwrap_or(MacAddr::ZERO),
            aid,
        };
        let changed = self.published != Some(current);
        if !changed && !dirty {
            return;
        }
        let write = |w: &crate::state::ControllerWriter<'_>| {
            w.set_mode(current.mode);
            w.set_channel(current.channel);
            w.set_flags(current.flags);
            w.set_wep_mode(current.wep_mode);
            w.set_assoc_status(current.status);
            w.set_connect_seq(current.connect_seq);
            w.set_bssid(current.bssid);
            w.set_aid(current.aid);
        };
        port.publish(&self.notifier, write);
        self.published = Some(current);
    }
}

/// Host requests read in one observe.
struct Requests {
    mode: WifiMode,
    channel: u8,
    flags: RequestFlags,
    wep_mode: WepMode,
    wep_key: heapless::Vec<u8, MAX_WEP_KEY_LEN>,
    ssid: Ssid,
    target_bssid: MacAddr,
    connect_seq: u8,
}

impl Requests {
    fn read(view: &RequestView<'_>) -> Self {
        Self {
            mode: view.mode(),
            channel: view.channel(),
            flags: view.flags(),
            wep_mode: view.wep_mode(),
            wep_key: view.wep_key(),
            ssid: view.ssid(),
            target_bssid: view.target_bssid(),
            connect_seq: view.connect_seq(),
        }
    }
}
