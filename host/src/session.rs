//! # Host Session
//!
//! The application's handle on the driver. A [Session] owns the shared
//! state allocation and the host end of the bridge. Every API call becomes
//! a write to host-owned request fields followed by a Sync to the
//! controller; everything the controller reports is picked up in
//! [Session::update], which runs whenever a Sync arrives.
//!
//! ## Lifecycle
//!
//! ```text
//!  init ──► (controller binds, Sync) ──► update: CONTROLLER_READY
//!    │
//!    ▼
//!  enable ─► connect ─► update: link up ─► transmit / receive
//!    │                                         │
//!    └──────────── disconnect / disable ◄──────┘
//!                        │
//!                        ▼
//!                     shutdown
//! ```
//!
//! ## Link State
//!
//! Frames can flow once the controller reaches `AcquiringAddress` (so an
//! address client can run) or `Associated`. `NET_UP` is raised only in
//! `Associated`.

use std::alloc::{alloc_zeroed, Layout};
use std::sync::Arc;

use log::{debug, info, trace, warn};

use wifi_shared::frame::{
    build_data_header, data_frame_span, data_header_len, llc_header, parse_data_frame, DataHeaderParams,
};
use wifi_shared::ieee::{LLC_SIZE, RX_HEADER_SIZE};
use wifi_shared::state::{AccessPoint, ApFlags, HostFlags, HostStat, HostWriter};
use wifi_shared::{
    AssocStatus, HostPort, IpcMessage, MacAddr, Notifier, RequestError, RequestFlags, SharedState,
    Signal, Ssid, Stats, Topology, WepMode, WifiMode, MAX_FRAME_LEN,
};

use crate::beacon::BeaconEmitter;
use crate::bridge::{IpcEndpoint, StateHandle};
use crate::config::{AddressMode, SessionConfig};
use crate::error::SessionError;
use crate::netif::{AddressConfig, NetworkStack, UpperFrame};

/// A network to join.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Network {
    /// Empty joins the first network seen.
    pub ssid: Ssid,
    /// [MacAddr::ZERO] accepts any BSSID carrying `ssid`.
    pub bssid: MacAddr,
    pub adhoc: bool,
}

impl From<&AccessPoint> for Network {
    fn from(ap: &AccessPoint) -> Self {
        Self {
            ssid: ap.ssid.clone(),
            bssid: ap.bssid,
            adhoc: ap.flags.contains(ApFlags::ADHOC),
        }
    }
}

type RawHandler = Box<dyn FnMut(&[u8]) + Send>;

pub struct Session {
    port: HostPort<StateHandle>,
    endpoint: IpcEndpoint,
    notifier: Box<dyn Notifier + Send>,
    config: SessionConfig,
    stack: Option<Box<dyn NetworkStack + Send>>,
    raw_handler: Option<RawHandler>,
    beacon: BeaconEmitter,
    address: Option<AddressConfig>,
    /// The stack has been told the link is up.
    link_up: bool,
    scratch: Vec<u8>,
}

/// Allocate a cleared store.
fn allocate_state() -> Result<StateHandle, SessionError> {
    let layout = Layout::new::<SharedState>();
    // SAFETY: `SharedState` consists only of atomics and arrays of atomics,
    // for which the all-zero bit pattern is a valid value. The pointer comes
    // from the global allocator with the layout of `SharedState`, which is
    // what `Box::from_raw` requires.
    let state = unsafe {
        let ptr = alloc_zeroed(layout).cast::<SharedState>();
        if ptr.is_null() {
            return Err(SessionError::AllocationFailure);
        }
        Box::from_raw(ptr)
    };
    Ok(Arc::from(state))
}

impl Session {
    /// Allocate the shared state, mark the host active and hand the store to
    /// the controller. The session is usable once [Session::is_ready].
    pub fn init(endpoint: IpcEndpoint, config: SessionConfig) -> Result<Self, SessionError> {
        let state = allocate_state()?;
        let port = HostPort::new(state.clone());
        port.commit(|w| {
            w.update_host_flags(|f| f.insert(HostFlags::HOST_ACTIVE));
            w.set_max_guests(config.max_guests);
        });
        endpoint.send(IpcMessage::Address(state))?;
        info!("session: shared state handed to controller, version {}", wifi_shared::VERSION);

        let notifier = Box::new(endpoint.notifier());
        Ok(Self {
            port,
            endpoint,
            notifier,
            beacon: BeaconEmitter::new(config.beacon_interval_ticks),
            config,
            stack: None,
            raw_handler: None,
            address: None,
            link_up: false,
            scratch: vec![0; MAX_FRAME_LEN],
        })
    }

    /// Store handle, as handed to the controller.
    pub fn handle(&self) -> &StateHandle {
        self.port.handle()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The controller is active and the host has acknowledged it.
    pub fn is_ready(&self) -> bool {
        self.port.requests().host_flags().contains(HostFlags::CONTROLLER_READY)
    }

    /// Process bridge messages until ready, yielding one tick at a time.
    pub async fn wait_until_ready(&mut self) -> Result<(), SessionError> {
        for _ in 0..=self.config.ready_timeout_ticks {
            self.poll_ipc()?;
            if self.is_ready() {
                return Ok(());
            }
            tokio::time::sleep(self.config.tick()).await;
        }
        warn!("session: controller not ready after {} ticks", self.config.ready_timeout_ticks);
        Err(SessionError::NotReady)
    }

    /// Handle every queued bridge message. Returns how many were handled.
    pub fn poll_ipc(&mut self) -> Result<usize, SessionError> {
        let mut handled = 0;
        while let Some(message) = self.endpoint.try_recv()? {
            handled += 1;
            match message {
                IpcMessage::Value(value) => match Signal::try_from(value) {
                    Ok(Signal::Sync) => self.update(),
                    Ok(other) => debug!("session: ignoring {:?} from controller", other),
                    Err(value) => warn!("session: unknown signal {}", value),
                },
                IpcMessage::Address(_) => warn!("session: unexpected address from controller"),
            }
        }
        Ok(handled)
    }

    /// Sync handler: acknowledge the controller, track the link and
    /// dispatch received frames.
    pub fn update(&mut self) {
        let (active, mac, status) = self
            .port
            .observe(|s| (s.is_active(), s.mac_address(), s.assoc_status()));

        if active && !self.is_ready() {
            self.port
                .commit(|w| w.update_host_flags(|f| f.insert(HostFlags::CONTROLLER_READY)));
            info!("session: controller ready, mac {}", mac);
            if let Some(stack) = &mut self.stack {
                stack.attach(mac, self.config.mtu);
            }
        }

        self.track_link(status);
        let dispatched = self.dispatch_rx(mac);
        if dispatched > 0 {
            trace!("session: dispatched {} frames", dispatched);
        }
    }

    fn track_link(&mut self, status: AssocStatus) {
        let associated = status == AssocStatus::Associated;
        let net_up = self.port.requests().host_flags().contains(HostFlags::NET_UP);
        if associated != net_up {
            self.port
                .commit(|w| w.update_host_flags(|f| f.set(HostFlags::NET_UP, associated)));
            info!("session: network {}", if associated { "up" } else { "down" });
        }

        let usable = matches!(status, AssocStatus::AcquiringAddress | AssocStatus::Associated);
        if usable == self.link_up {
            return;
        }
        self.link_up = usable;
        let Some(stack) = &mut self.stack else {
            return;
        };
        if usable {
            stack.link_up();
            if let AddressMode::Static(config) = self.config.address {
                stack.set_address(&config);
                self.address = Some(config);
            }
        } else {
            stack.link_down();
        }
    }

    /// Hand up to `rx_dispatch_cap` received frames to the raw handler and
    /// the network stack.
    fn dispatch_rx(&mut self, own: MacAddr) -> usize {
        let cap = self.config.rx_dispatch_cap;
        let Self {
            port,
            scratch,
            stack,
            raw_handler,
            ..
        } = self;

        port.commit(|w| {
            let rx = w.rx_ring();
            let mut dispatched = 0;
            while dispatched < cap && rx.has_pending() {
                let at = rx.cursor();
                let length = rx.peek_header(at);
                if length.bytes() > scratch.len() {
                    debug!("session: dropping oversized rx frame of {} bytes", length.bytes());
                    w.add_stat(HostStat::RxDropped, 1);
                    rx.advance(length);
                    dispatched += 1;
                    continue;
                }
                let n = rx.read_into(scratch, rx.offset(at, RX_HEADER_SIZE), length.bytes());
                let frame = &scratch[..n];

                if let Some(handler) = raw_handler.as_mut() {
                    handler(frame);
                }
                match (parse_data_frame(frame, own), stack.as_mut()) {
                    (Ok(data), Some(stack)) => {
                        w.add_stat(HostStat::RxDeliveredPackets, 1);
                        w.add_stat(HostStat::RxDeliveredBytes, data.payload.len() as u32);
                        stack.receive(UpperFrame {
                            dest: data.dest,
                            src: data.src,
                            protocol: data.protocol,
                            payload: data.payload,
                        });
                    }
                    (Ok(_), None) => w.add_stat(HostStat::RxDropped, 1),
                    (Err(err), _) => {
                        trace!("session: dropping rx frame: {}", err);
                        w.add_stat(HostStat::RxDropped, 1);
                    }
                }
                rx.advance(length);
                dispatched += 1;
            }
            dispatched
        })
    }

    /// Timer entry point: emits beacons while hosting.
    pub fn tick(&mut self) {
        if !self.beacon.is_active() {
            return;
        }
        let (own, channel) = self.port.observe(|s| (s.mac_address(), s.channel()));
        let beacon = &mut self.beacon;
        match self.port.commit(|w| beacon.tick(w, own, channel)) {
            Ok(true) => self.notifier.notify_peer(),
            Ok(false) => {}
            Err(err) => debug!("session: beacon deferred: {}", err),
        }
    }

    /// Write requests and notify the controller.
    fn publish<R>(&self, f: impl FnOnce(&HostWriter<'_>) -> R) -> R {
        let notifier: &dyn Notifier = &*self.notifier;
        self.port.publish(&notifier, f)
    }

    fn set_mode(&self, mode: WifiMode) {
        self.publish(|w| {
            w.set_mode(mode);
            w.update_flags(|f| f.remove(RequestFlags::CONNECT | RequestFlags::ADDRESS_READY));
        });
    }

    /// Power the radio up in normal mode.
    pub fn enable(&self) -> Result<(), SessionError> {
        self.set_mode(WifiMode::Normal);
        self.endpoint.send_signal(Signal::Enable)
    }

    /// Power the radio down, leaving any network.
    pub fn disable(&mut self) -> Result<(), SessionError> {
        self.beacon.stop();
        self.set_mode(WifiMode::Disabled);
        self.endpoint.send_signal(Signal::Disable)
    }

    /// Listen for networks, filling the access point table.
    pub fn scan_mode(&self) {
        self.set_mode(WifiMode::Scan);
    }

    /// Stay powered in normal mode without a connection.
    pub fn idle_mode(&self) {
        self.set_mode(WifiMode::Normal);
    }

    /// Tune to `channel`. Only accepted in normal or scan mode.
    pub fn set_channel(&self, channel: u8) -> Result<(), SessionError> {
        let mode = self.port.requests().mode();
        if !matches!(mode, WifiMode::Normal | WifiMode::Scan) {
            return Err(RequestError::ChannelNotAllowed(mode).into());
        }
        self.publish(|w| w.set_channel(channel))?;
        Ok(())
    }

    pub fn set_promiscuous(&self, enabled: bool) {
        self.publish(|w| w.update_flags(|f| f.set(RequestFlags::PROMISCUOUS, enabled)));
    }

    pub fn set_wep(&self, mode: WepMode, key: &[u8]) -> Result<(), SessionError> {
        self.publish(|w| w.set_wep(mode, key))?;
        Ok(())
    }

    /// Guests announced in beacons while hosting.
    pub fn set_max_guests(&self, guests: u8) {
        self.port.commit(|w| w.set_max_guests(guests));
    }

    /// Start joining `network`. Progress is visible through
    /// [Session::assoc_status].
    pub fn connect(&self, network: &Network) {
        let acquire = self.config.address == AddressMode::Acquire;
        info!("session: connect to {} ({})", network.ssid, network.bssid);
        self.publish(|w| {
            w.set_mode(WifiMode::Normal);
            w.set_ssid(&network.ssid);
            w.set_target_bssid(network.bssid);
            w.update_flags(|f| {
                f.set(RequestFlags::ADHOC, network.adhoc);
                f.set(RequestFlags::ACQUIRE_ADDRESS, acquire);
                f.remove(RequestFlags::ADDRESS_READY);
            });
            w.request_connect();
        });
    }

    pub fn disconnect(&self) {
        info!("session: disconnect");
        self.publish(|w| {
            w.update_flags(|f| f.remove(RequestFlags::CONNECT | RequestFlags::ADDRESS_READY))
        });
    }

    /// Associated and reported up to the application.
    pub fn is_net_up(&self) -> bool {
        self.port.requests().host_flags().contains(HostFlags::NET_UP)
    }

    pub fn assoc_status(&self) -> AssocStatus {
        self.port.observe(|s| s.assoc_status())
    }

    /// Wait for the current connect request to finish, yielding one tick
    /// at a time.
    ///
    /// Status published for an earlier request is ignored until the
    /// controller reports having picked up this one.
    pub async fn wait_until_associated(&mut self) -> Result<(), SessionError> {
        let seq = self.port.requests().connect_seq();
        loop {
            self.poll_ipc()?;
            if !self.port.requests().flags().contains(RequestFlags::CONNECT) {
                return Err(SessionError::LinkFailure);
            }
            let (status, applied) = self.port.observe(|s| (s.assoc_status(), s.connect_seq()));
            if applied == seq {
                match status {
                    AssocStatus::Associated => return Ok(()),
                    AssocStatus::CannotConnect => return Err(SessionError::LinkFailure),
                    _ => {}
                }
            }
            self.tick();
            tokio::time::sleep(self.config.tick()).await;
        }
    }

    /// Queue one upper-layer frame for transmission.
    pub fn transmit(&self, dest: MacAddr, protocol: u16, payload: &[u8]) -> Result<(), SessionError> {
        if payload.len() > self.config.mtu {
            return Err(SessionError::FrameTooLarge(payload.len()));
        }
        if !self.link_up {
            return Err(SessionError::NetworkDown);
        }
        let (own, bssid, wep) = self
            .port
            .observe(|s| (s.mac_address(), s.bssid(), s.wep_mode().is_enabled()));
        let topology = if self.port.requests().flags().contains(RequestFlags::ADHOC) {
            Topology::AdHoc
        } else {
            Topology::Infrastructure
        };
        let params = DataHeaderParams {
            topology,
            own,
            bssid,
            dest,
            wep,
        };
        let mut header = [0u8; data_header_len(true)];
        let header_len = build_data_header(&params, payload.len(), &mut header)?;
        let span = data_frame_span(payload.len(), wep);

        self.port.commit(|w| {
            let tx = w.tx_ring();
            if span > tx.bytes_available() {
                w.add_stat(HostStat::TxNoSpace, 1);
                return Err(SessionError::NoSpace);
            }
            let start = tx.cursor();
            let geometry = tx.geometry();
            let llc_at = geometry.advance(start, header_len);
            let payload_at = geometry.advance(llc_at, LLC_SIZE);
            tx.write(start, &header[..header_len])?;
            tx.write(llc_at, &llc_header(protocol))?;
            tx.write(payload_at, payload)?;
            // The WEP ICV is reserved, the hardware fills it.
            tx.advance(span)?;
            w.add_stat(HostStat::TxQueuedPackets, 1);
            w.add_stat(HostStat::TxQueuedBytes, payload.len() as u32);
            Ok::<_, SessionError>(())
        })?;
        self.notifier.notify_peer();
        Ok(())
    }

    pub fn access_points(&self) -> Vec<AccessPoint> {
        self.port.observe(|s| s.access_points().collect())
    }

    pub fn find_access_point(&self, ssid: &Ssid) -> Option<AccessPoint> {
        self.port.observe(|s| s.access_points().find(|ap| ap.ssid == *ssid))
    }

    pub fn mac_address(&self) -> MacAddr {
        self.port.observe(|s| s.mac_address())
    }

    pub fn stats(&self) -> Stats {
        let requests = self.port.requests();
        self.port.observe(|s| Stats::collect(&requests, s))
    }

    pub fn stats_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(&self.stats())?)
    }

    /// Report the negotiated address. Completes a join waiting in
    /// `AcquiringAddress`.
    pub fn set_address_config(&mut self, config: AddressConfig) {
        info!("session: address {}", config.local);
        if let Some(stack) = &mut self.stack {
            stack.set_address(&config);
        }
        self.address = Some(config);
        self.publish(|w| w.update_flags(|f| f.insert(RequestFlags::ADDRESS_READY)));
    }

    pub fn address_config(&self) -> Option<AddressConfig> {
        self.address
    }

    /// Attach the network stack. Attached immediately if the controller is
    /// already ready.
    pub fn set_network_stack(&mut self, mut stack: impl NetworkStack + Send + 'static) {
        if self.is_ready() {
            stack.attach(self.mac_address(), self.config.mtu);
            if self.link_up {
                stack.link_up();
            }
        }
        self.stack = Some(Box::new(stack));
    }

    /// Called with every received frame (MAC header onwards) before it is
    /// parsed.
    pub fn set_raw_handler(&mut self, handler: impl FnMut(&[u8]) + Send + 'static) {
        self.raw_handler = Some(Box::new(handler));
    }

    /// Replace how the controller is woken after requests are written.
    pub fn set_sync_handler(&mut self, notifier: impl Notifier + Send + 'static) {
        self.notifier = Box::new(notifier);
    }

    /// Host a network: beacon `ssid` on the current channel.
    pub fn start_beacon(&mut self, ssid: Ssid, game_id: u32) {
        self.beacon.start(ssid, game_id);
    }

    pub fn stop_beacon(&mut self) {
        self.beacon.stop();
    }

    /// Leave any network, power down and release the controller.
    pub fn shutdown(mut self) -> Result<(), SessionError> {
        self.beacon.stop();
        if self.link_up {
            if let Some(stack) = &mut self.stack {
                stack.link_down();
            }
            self.link_up = false;
        }
        self.publish(|w| {
            w.set_mode(WifiMode::Disabled);
            w.update_flags(|f| f.remove(RequestFlags::CONNECT | RequestFlags::ADDRESS_READY));
            w.update_host_flags(|f| f.remove(HostFlags::HOST_ACTIVE | HostFlags::NET_UP));
        });
        info!("session: shut down");
        self.endpoint.send_signal(Signal::Disable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard};

    use wifi_shared::frame::{build_assoc_response, build_auth, build_beacon, BeaconParams, MgmtAddrs, BEACON_MAX_LEN};
    use wifi_shared::frame::{parse_management, ManagementFrame};
    use wifi_shared::ieee::{fc, MacHeader, MAC_HEADER_SIZE, TX_HEADER_SIZE};
    use wifi_shared::{Controller, ControllerConfig, Radio, Timeouts};

    use crate::bridge::{channel, PeerNotifier};

    const OWN: MacAddr = MacAddr([0x00, 0x09, 0xBF, 0x00, 0x00, 0x01]);
    const AP: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0xAA]);
    const PEER: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x42]);

    const STATIC: AddressConfig = AddressConfig {
        local: Ipv4Addr::new(192, 168, 1, 20),
        gateway: Ipv4Addr::new(192, 168, 1, 1),
        netmask: Ipv4Addr::new(255, 255, 255, 0),
        dns: [Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(8, 8, 8, 8)],
    };

    #[derive(Default)]
    struct FakeRadio {
        enabled: bool,
        channel: u8,
        promiscuous: bool,
        sent: Vec<Vec<u8>>,
    }

    impl Radio for FakeRadio {
        type Error = ();

        fn mac_address(&self) -> MacAddr {
            OWN
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }

        fn set_channel(&mut self, channel: u8) {
            self.channel = channel;
        }

        fn set_promiscuous(&mut self, enabled: bool) {
            self.promiscuous = enabled;
        }

        fn set_wep(&mut self, _mode: WepMode, _key: &[u8]) {}

        fn transmit(&mut self, frame: &[u8]) -> Result<(), ()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Seen {
        attached: Option<(MacAddr, usize)>,
        frames: Vec<(MacAddr, MacAddr, u16, Vec<u8>)>,
        link_up: bool,
        address: Option<AddressConfig>,
    }

    #[derive(Clone, Default)]
    struct FakeStack(Arc<Mutex<Seen>>);

    impl FakeStack {
        fn seen(&self) -> MutexGuard<'_, Seen> {
            self.0.lock().unwrap()
        }
    }

    impl NetworkStack for FakeStack {
        fn attach(&mut self, mac: MacAddr, mtu: usize) {
            self.seen().attached = Some((mac, mtu));
        }

        fn receive(&mut self, frame: UpperFrame<'_>) {
            self.seen()
                .frames
                .push((frame.dest, frame.src, frame.protocol, frame.payload.to_vec()));
        }

        fn link_up(&mut self) {
            self.seen().link_up = true;
        }

        fn link_down(&mut self) {
            self.seen().link_up = false;
        }

        fn set_address(&mut self, config: &AddressConfig) {
            self.seen().address = Some(*config);
        }
    }

    /// A session and a controller wired back to back, pumped by hand.
    struct Rig {
        session: Session,
        controller: Controller<StateHandle, FakeRadio, PeerNotifier>,
        ctrl_ep: IpcEndpoint,
        stack: FakeStack,
    }

    impl Rig {
        fn new(config: SessionConfig, ctrl_config: ControllerConfig) -> Self {
            let (host_ep, ctrl_ep) = channel();
            let mut session = Session::init(host_ep, config).unwrap();
            let stack = FakeStack::default();
            session.set_network_stack(stack.clone());
            let controller = Controller::new(FakeRadio::default(), ctrl_ep.notifier(), ctrl_config);
            let mut rig = Self {
                session,
                controller,
                ctrl_ep,
                stack,
            };
            rig.pump();
            rig
        }

        fn with_static_address() -> Self {
            let config = SessionConfig {
                address: AddressMode::Static(STATIC),
                ..Default::default()
            };
            Self::new(config, ControllerConfig::default())
        }

        /// Deliver messages both ways until the bridge is quiet.
        fn pump(&mut self) {
            loop {
                let mut moved = 0;
                while let Some(message) = self.ctrl_ep.try_recv().unwrap() {
                    self.controller.handle_message(message);
                    moved += 1;
                }
                moved += self.session.poll_ipc().unwrap();
                if moved == 0 {
                    break;
                }
            }
        }

        /// Join the fake AP's "home" network.
        fn join(&mut self) {
            self.session.enable().unwrap();
            self.session.connect(&Network {
                ssid: Ssid::try_from("home").unwrap(),
                ..Default::default()
            });
            self.pump();
            self.controller.on_frame_received(0x2814, &ap_beacon());
            self.controller
                .on_frame_received(0, &from_ap(|a, out| build_auth(a, 2, 0, out).unwrap()));
            self.controller
                .on_frame_received(0, &from_ap(|a, out| build_assoc_response(a, 0, 1, out).unwrap()));
            self.pump();
        }
    }

    fn from_ap(build: impl FnOnce(&MgmtAddrs, &mut [u8]) -> usize) -> Vec<u8> {
        let addrs = MgmtAddrs {
            receiver: OWN,
            transmitter: AP,
            bssid: AP,
        };
        let mut buf = [0u8; BEACON_MAX_LEN];
        let n = build(&addrs, &mut buf);
        buf[TX_HEADER_SIZE..n].to_vec()
    }

    fn ap_beacon() -> Vec<u8> {
        from_ap(|_, out| {
            let params = BeaconParams {
                own: AP,
                ssid: b"home",
                channel: 6,
                game_id: 0,
                max_guests: 0,
            };
            build_beacon(&params, out).unwrap()
        })
    }

    fn data_from_ap(llc: [u8; LLC_SIZE], payload: &[u8]) -> Vec<u8> {
        let header = MacHeader {
            frame_control: fc::TYPE_DATA | fc::FROM_DS,
            duration: 0,
            addr1: OWN,
            addr2: AP,
            addr3: PEER,
            seq_ctl: 0,
        };
        let mut frame = header.encode().to_vec();
        frame.extend_from_slice(&llc);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_init_hands_over_and_becomes_ready() {
        let rig = Rig::new(SessionConfig::default(), ControllerConfig::default());
        assert!(rig.controller.is_bound());
        assert!(rig.session.is_ready());
        assert_eq!(rig.session.mac_address(), OWN);
        assert_eq!(rig.stack.seen().attached, Some((OWN, 2300)));
        assert_eq!(rig.session.assoc_status(), AssocStatus::Disconnected);
        assert!(!rig.session.is_net_up());
    }

    #[test]
    fn test_requests_validated_and_applied() {
        let mut rig = Rig::new(SessionConfig::default(), ControllerConfig::default());

        let err = rig.session.set_channel(6).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidRequest(RequestError::ChannelNotAllowed(WifiMode::Disabled))
        ));

        rig.session.enable().unwrap();
        assert!(matches!(
            rig.session.set_channel(14),
            Err(SessionError::InvalidRequest(RequestError::InvalidChannel(14)))
        ));
        rig.session.set_channel(6).unwrap();
        rig.session.set_promiscuous(true);
        rig.session.set_wep(WepMode::Wep128, &[0x11; 13]).unwrap();
        assert!(matches!(
            rig.session.set_wep(WepMode::Wep64, b"abc"),
            Err(SessionError::InvalidRequest(RequestError::InvalidWepKey { expected: 5, actual: 3 }))
        ));
        rig.pump();

        let radio = rig.controller.radio();
        assert!(radio.enabled);
        assert_eq!(radio.channel, 6);
        assert!(radio.promiscuous);

        rig.session.disable().unwrap();
        rig.pump();
        assert!(!rig.controller.radio().enabled);
    }

    #[test]
    fn test_scan_fills_access_points() {
        let mut rig = Rig::new(SessionConfig::default(), ControllerConfig::default());
        rig.session.scan_mode();
        rig.pump();
        rig.controller.on_frame_received(0x2814, &ap_beacon());
        rig.pump();

        let aps = rig.session.access_points();
        assert_eq!(aps.len(), 1);
        let home = rig.session.find_access_point(&Ssid::try_from("home").unwrap()).unwrap();
        assert_eq!(home.channel, 6);
        let network = Network::from(&home);
        assert_eq!(network.bssid, AP);
        assert!(!network.adhoc);
        assert!(rig.session.find_access_point(&Ssid::try_from("other").unwrap()).is_none());

        // A fresh scan forgets what the last one saw.
        rig.session.idle_mode();
        rig.pump();
        rig.session.scan_mode();
        rig.pump();
        assert!(rig.session.access_points().is_empty());
    }

    #[test]
    fn test_join_transmit_and_receive() {
        let mut rig = Rig::with_static_address();
        rig.join();
        assert_eq!(rig.session.assoc_status(), AssocStatus::Associated);
        assert!(rig.session.is_net_up());
        {
            let seen = rig.stack.seen();
            assert!(seen.link_up);
            assert_eq!(seen.address, Some(STATIC));
        }
        assert_eq!(rig.session.address_config(), Some(STATIC));

        rig.session.transmit(PEER, 0x0800, b"ping").unwrap();
        rig.pump();
        let sent = rig.controller.radio().sent.last().unwrap().clone();
        let header = MacHeader::decode(&sent[TX_HEADER_SIZE..]).unwrap();
        assert_eq!(header.frame_control & fc::TO_DS, fc::TO_DS);
        assert_eq!(header.addr1, AP);
        assert_eq!(header.addr2, OWN);
        assert_eq!(header.addr3, PEER);
        assert_eq!(&sent[TX_HEADER_SIZE + MAC_HEADER_SIZE..][..LLC_SIZE], &llc_header(0x0800));
        assert_eq!(&sent[TX_HEADER_SIZE + MAC_HEADER_SIZE + LLC_SIZE..], b"ping");

        rig.controller
            .on_frame_received(0, &data_from_ap(llc_header(0x0806), b"pong"));
        rig.pump();
        assert_eq!(
            rig.stack.seen().frames,
            vec![(OWN, PEER, 0x0806, b"pong".to_vec())]
        );

        let stats = rig.session.stats();
        assert_eq!(stats.tx_queued_packets, 1);
        assert_eq!(stats.tx_queued_bytes, 4);
        assert_eq!(stats.tx_packets, 1);
        assert_eq!(stats.rx_packets, 1);
        assert_eq!(stats.rx_delivered_packets, 1);
        assert_eq!(stats.rx_dropped, 0);
        let json = rig.session.stats_json().unwrap();
        assert!(json.contains("\"tx_queued_packets\":1"));
    }

    #[test]
    fn test_transmit_preconditions() {
        let mut rig = Rig::with_static_address();
        rig.session.enable().unwrap();
        rig.pump();
        assert!(matches!(
            rig.session.transmit(PEER, 0x0800, b"early"),
            Err(SessionError::NetworkDown)
        ));
        let big = vec![0u8; 2301];
        assert!(matches!(
            rig.session.transmit(PEER, 0x0800, &big),
            Err(SessionError::FrameTooLarge(2301))
        ));
    }

    #[test]
    fn test_full_tx_ring_reports_no_space() {
        let mut rig = Rig::with_static_address();
        rig.join();
        let payload = vec![0x5A; 2300];
        let mut queued = 0;
        let err = loop {
            match rig.session.transmit(PEER, 0x0800, &payload) {
                Ok(()) => queued += 1,
                Err(err) => break err,
            }
        };
        assert!(matches!(err, SessionError::NoSpace));
        assert_eq!(queued, 10);
        let stats = rig.session.stats();
        assert_eq!(stats.tx_no_space, 1);
        assert_eq!(stats.tx_queued_packets, 10);

        // One sync per queued frame, none for the refused one.
        let mut syncs = 0;
        while let Some(message) = rig.ctrl_ep.try_recv().unwrap() {
            assert_eq!(message.as_signal(), Some(Signal::Sync));
            syncs += 1;
        }
        assert_eq!(syncs, 10);
    }

    #[test]
    fn test_rx_dispatch_is_capped() {
        let config = SessionConfig {
            rx_dispatch_cap: 2,
            address: AddressMode::Static(STATIC),
            ..Default::default()
        };
        let mut rig = Rig::new(config, ControllerConfig::default());
        rig.join();
        for i in 0..5u8 {
            rig.controller
                .on_frame_received(0, &data_from_ap(llc_header(0x0800), &[i]));
        }
        rig.session.update();
        assert_eq!(rig.stack.seen().frames.len(), 2);
        rig.session.update();
        assert_eq!(rig.stack.seen().frames.len(), 4);
        rig.session.update();
        let seen = rig.stack.seen();
        assert_eq!(seen.frames.len(), 5);
        assert_eq!(seen.frames[4].3, vec![4]);
    }

    #[test]
    fn test_raw_handler_and_bad_llc() {
        let mut rig = Rig::with_static_address();
        rig.join();
        let raw = Arc::new(AtomicUsize::new(0));
        let counter = raw.clone();
        rig.session.set_raw_handler(move |_frame| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        rig.controller.on_frame_received(0, &data_from_ap([0; LLC_SIZE], b"junk"));
        rig.controller
            .on_frame_received(0, &data_from_ap(llc_header(0x0800), b"good"));
        rig.pump();

        assert_eq!(raw.load(Ordering::Relaxed), 2);
        assert_eq!(rig.stack.seen().frames.len(), 1);
        assert_eq!(rig.session.stats().rx_dropped, 1);
    }

    #[test]
    fn test_oversized_rx_frame_dropped() {
        let mut rig = Rig::with_static_address();
        rig.join();
        let raw = Arc::new(AtomicUsize::new(0));
        let counter = raw.clone();
        rig.session.set_raw_handler(move |_frame| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        rig.controller
            .on_frame_received(0, &data_from_ap(llc_header(0x0800), &vec![0xEE; 3000]));
        rig.controller
            .on_frame_received(0, &data_from_ap(llc_header(0x0800), b"after"));
        rig.pump();

        assert_eq!(raw.load(Ordering::Relaxed), 1);
        let seen = rig.stack.seen();
        assert_eq!(seen.frames.len(), 1);
        assert_eq!(seen.frames[0].3, b"after".to_vec());
        drop(seen);
        let stats = rig.session.stats();
        assert_eq!(stats.rx_dropped, 1);
        assert_eq!(stats.rx_delivered_packets, 1);
    }

    #[test]
    fn test_disconnect_takes_link_down() {
        let mut rig = Rig::with_static_address();
        rig.join();
        assert!(rig.stack.seen().link_up);

        rig.session.disconnect();
        rig.pump();
        let last = rig.controller.radio().sent.last().unwrap().clone();
        assert_eq!(
            MacHeader::decode(&last[TX_HEADER_SIZE..]).unwrap().kind(),
            fc::TYPE_DEAUTHENTICATION
        );
        assert_eq!(rig.session.assoc_status(), AssocStatus::Disconnected);
        assert!(!rig.session.is_net_up());
        assert!(!rig.stack.seen().link_up);
        assert!(matches!(
            rig.session.transmit(PEER, 0x0800, b"late"),
            Err(SessionError::NetworkDown)
        ));
    }

    #[test]
    fn test_acquired_address_completes_join() {
        let mut rig = Rig::new(SessionConfig::default(), ControllerConfig::default());
        rig.join();
        assert_eq!(rig.session.assoc_status(), AssocStatus::AcquiringAddress);
        assert!(rig.stack.seen().link_up);
        assert!(!rig.session.is_net_up());
        // Address negotiation traffic may flow before the network is up.
        rig.session.transmit(MacAddr::BROADCAST, 0x0800, b"discover").unwrap();

        let leased = AddressConfig {
            local: Ipv4Addr::new(10, 0, 0, 7),
            ..STATIC
        };
        rig.session.set_address_config(leased);
        rig.pump();
        assert_eq!(rig.session.assoc_status(), AssocStatus::Associated);
        assert!(rig.session.is_net_up());
        assert_eq!(rig.stack.seen().address, Some(leased));
        assert_eq!(rig.session.address_config(), Some(leased));
    }

    #[test]
    fn test_beacons_while_hosting() {
        let mut rig = Rig::new(SessionConfig::default(), ControllerConfig::default());
        rig.session.enable().unwrap();
        rig.session.set_channel(11).unwrap();
        rig.session.set_max_guests(2);
        rig.pump();

        rig.session.start_beacon(Ssid::try_from("TESTNET").unwrap(), 9);
        rig.session.tick();
        rig.pump();
        let sent = rig.controller.radio().sent.clone();
        assert_eq!(sent.len(), 1);
        match parse_management(&sent[0][TX_HEADER_SIZE..]).unwrap() {
            ManagementFrame::Beacon(info) => {
                assert_eq!(info.bssid, OWN);
                assert_eq!(info.channel, Some(11));
                assert_eq!(info.vendor.unwrap().players_max, 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        rig.session.stop_beacon();
        for _ in 0..4 {
            rig.session.tick();
        }
        rig.pump();
        assert_eq!(rig.controller.radio().sent.len(), 1);
    }

    #[test]
    fn test_sync_handler_replaced() {
        #[derive(Clone, Default)]
        struct Counting(Arc<AtomicUsize>);

        impl Notifier for Counting {
            fn notify_peer(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut rig = Rig::new(SessionConfig::default(), ControllerConfig::default());
        let counting = Counting::default();
        rig.session.set_sync_handler(counting.clone());
        rig.session.idle_mode();
        rig.session.set_promiscuous(false);
        assert_eq!(counting.0.load(Ordering::Relaxed), 2);
        // Nothing went over the bridge.
        assert!(rig.ctrl_ep.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_until_associated_outcomes() {
        let mut rig = Rig::with_static_address();
        rig.join();
        rig.session.wait_until_associated().await.unwrap();

        let config = ControllerConfig {
            timeouts: Timeouts {
                search_ticks: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut rig = Rig::new(SessionConfig::default(), config);
        rig.session.enable().unwrap();
        rig.session.connect(&Network::default());
        rig.pump();
        for _ in 0..3 {
            rig.controller.tick();
        }
        rig.pump();
        assert!(matches!(
            rig.session.wait_until_associated().await,
            Err(SessionError::LinkFailure)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ignores_status_of_previous_connect() {
        let config = SessionConfig {
            address: AddressMode::Static(STATIC),
            ..Default::default()
        };
        let ctrl_config = ControllerConfig {
            timeouts: Timeouts {
                search_ticks: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut rig = Rig::new(config, ctrl_config);
        let home = Network {
            ssid: Ssid::try_from("home").unwrap(),
            ..Default::default()
        };
        rig.session.enable().unwrap();
        rig.session.connect(&home);
        rig.pump();
        rig.controller.tick();
        rig.pump();
        assert_eq!(rig.session.assoc_status(), AssocStatus::CannotConnect);

        // The retry has not reached the controller: keep waiting.
        rig.session.connect(&home);
        let wait = tokio::time::timeout(Duration::from_secs(1), rig.session.wait_until_associated());
        assert!(wait.await.is_err());

        rig.pump();
        assert_eq!(rig.session.assoc_status(), AssocStatus::Searching);
        rig.controller.on_frame_received(0x2814, &ap_beacon());
        rig.controller
            .on_frame_received(0, &from_ap(|a, out| build_auth(a, 2, 0, out).unwrap()));
        rig.controller
            .on_frame_received(0, &from_ap(|a, out| build_assoc_response(a, 0, 1, out).unwrap()));
        rig.pump();
        rig.session.wait_until_associated().await.unwrap();

        // Associated with the old request does not satisfy a new one.
        rig.session.connect(&home);
        let wait = tokio::time::timeout(Duration::from_secs(1), rig.session.wait_until_associated());
        assert!(wait.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_with_live_controller() {
        let (host_ep, mut ctrl_ep) = channel();
        let mut session = Session::init(host_ep, SessionConfig::default()).unwrap();
        let notifier = ctrl_ep.notifier();
        let task = tokio::spawn(async move {
            let mut controller = Controller::new(FakeRadio::default(), notifier, ControllerConfig::default());
            while let Some(message) = ctrl_ep.recv().await {
                controller.handle_message(message);
            }
            controller.radio().enabled
        });

        session.wait_until_ready().await.unwrap();
        assert!(session.is_ready());
        session.enable().unwrap();
        session.shutdown().unwrap();
        // The bridge closes with the session; the controller saw Disable last.
        assert!(!task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_times_out() {
        let (host_ep, _ctrl_ep) = channel();
        let config = SessionConfig {
            ready_timeout_ticks: 3,
            ..Default::default()
        };
        let mut session = Session::init(host_ep, config).unwrap();
        assert!(matches!(session.wait_until_ready().await, Err(SessionError::NotReady)));
    }
}
