//! # Association Engine
//!
//! Drives a station from idle to a joined network.
//!
//! ```text
//!                Connect
//! Disconnected ──────────► Searching ──NetworkFound──► Authenticating
//!      ▲                       │ (ad-hoc) │                  │ AuthResponse ok
//!      │ Disconnect            │          │                  ▼
//!      │ (from any state)      │          │             Associating
//!      │                       │          │                  │ AssocResponse ok
//!      │                       │          ▼                  ▼
//!      │                       │   AcquiringAddress ◄────────┤ (address requested)
//!      │                       │          │ AddressAcquired  │
//!      │                       ▼          ▼                  ▼
//!      │                CannotConnect   Associated ◄─────────┘
//!      └──── Deauth / link loss ─────────┘
//! ```
//!
//! [transition] is a pure function of (state, event); everything with an
//! effect outside the engine is returned as an [Action] for the controller
//! to carry out. Every state that waits for a peer has a tick budget and
//! ends in `CannotConnect` when it runs out.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::ieee::MacAddr;
use crate::state::{AssocStatus, Ssid};

/// Tick budgets. One tick is one controller timer period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Waiting for a beacon or probe response from the target.
    pub search_ticks: u32,
    /// Waiting for each authentication response.
    pub auth_ticks: u32,
    /// Waiting for the association response.
    pub assoc_ticks: u32,
    /// Waiting for the host to configure an address.
    pub address_ticks: u32,
    /// Ticks without a beacon before an established link is dropped.
    /// Zero disables the check.
    pub link_loss_ticks: u32,
    /// Authentication requests sent before a rejection is final.
    pub auth_attempts: u8,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            search_ticks: 300,
            auth_ticks: 60,
            assoc_ticks: 60,
            address_ticks: 1200,
            link_loss_ticks: 600,
            auth_attempts: 3,
        }
    }
}

/// What the host asked to join.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Target {
    /// Empty matches any network name.
    pub ssid: Ssid,
    /// [MacAddr::ZERO] matches any BSSID.
    pub bssid: MacAddr,
    pub adhoc: bool,
    /// Hold the link until the host reports an address.
    pub acquire_address: bool,
}

impl Target {
    pub fn matches(&self, bssid: MacAddr, ssid: &Ssid) -> bool {
        (self.bssid == MacAddr::ZERO || self.bssid == bssid)
            && (self.ssid.is_empty() || self.ssid == *ssid)
    }
}

/// A network the engine has locked onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bss {
    pub bssid: MacAddr,
    pub channel: u8,
}

/// Why a connection attempt ended in `CannotConnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Failure {
    NotFound,
    AuthTimeout,
    AuthRejected(u16),
    AssocTimeout,
    AssocRejected(u16),
    AddressTimeout,
    /// Peer dropped us during the handshake.
    Deauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Disconnected,
    Searching {
        target: Target,
        elapsed: u32,
    },
    Authenticating {
        target: Target,
        bss: Bss,
        attempts: u8,
        elapsed: u32,
    },
    Associating {
        target: Target,
        bss: Bss,
        elapsed: u32,
    },
    AcquiringAddress {
        bss: Bss,
        aid: u16,
        elapsed: u32,
    },
    Associated {
        bss: Bss,
        aid: u16,
        since_beacon: u32,
    },
    CannotConnect(Failure),
}

impl State {
    /// Value mirrored into the shared status field.
    pub fn status(&self) -> AssocStatus {
        match self {
            Self::Disconnected => AssocStatus::Disconnected,
            Self::Searching { .. } => AssocStatus::Searching,
            Self::Authenticating { .. } => AssocStatus::Authenticating,
            Self::Associating { .. } => AssocStatus::Associating,
            Self::AcquiringAddress { .. } => AssocStatus::AcquiringAddress,
            Self::Associated { .. } => AssocStatus::Associated,
            Self::CannotConnect(_) => AssocStatus::CannotConnect,
        }
    }

    /// The network being joined or joined, if any.
    pub fn bss(&self) -> Option<Bss> {
        match self {
            Self::Authenticating { bss, .. }
            | Self::Associating { bss, .. }
            | Self::AcquiringAddress { bss, .. }
            | Self::Associated { bss, .. } => Some(*bss),
            _ => None,
        }
    }

    pub fn is_associated(&self) -> bool {
        matches!(self, Self::Associated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    Connect(Target),
    Disconnect,
    /// Beacon or probe response.
    NetworkFound {
        bssid: MacAddr,
        ssid: Ssid,
        channel: u8,
    },
    AuthResponse {
        from: MacAddr,
        status: u16,
    },
    AssocResponse {
        from: MacAddr,
        status: u16,
        aid: u16,
    },
    Deauthenticated {
        from: MacAddr,
    },
    Disassociated {
        from: MacAddr,
    },
    AddressAcquired,
    Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    SetChannel(u8),
    SendAuthRequest { bssid: MacAddr },
    SendAssocRequest { bssid: MacAddr, ssid: Ssid },
    SendDeauth { bssid: MacAddr },
    LinkUp { bssid: MacAddr, aid: u16 },
    LinkDown,
}

pub type Actions = Vec<Action, 4>;

const STATUS_SUCCESS: u16 = 0;
/// Reason code sent when leaving a network on request.
pub const REASON_LEAVING: u16 = 3;

fn actions<const N: usize>(list: [Action; N]) -> Actions {
    let mut out = Actions::new();
    for action in list {
        // Capacity covers the longest list built here.
        let _ = out.push(action);
    }
    out
}

/// Complete the join, either through address acquisition or directly.
fn joined(target: &Target, bss: Bss, aid: u16) -> (State, Actions) {
    if target.acquire_address {
        (State::AcquiringAddress { bss, aid, elapsed: 0 }, Actions::new())
    } else {
        (
            State::Associated { bss, aid, since_beacon: 0 },
            actions([Action::LinkUp { bssid: bss.bssid, aid }]),
        )
    }
}

/// Advance `state` by one event.
pub fn transition(state: State, event: Event, timeouts: &Timeouts) -> (State, Actions) {
    use State::*;

    let link_down = || {
        if state.is_associated() {
            actions([Action::LinkDown])
        } else {
            Actions::new()
        }
    };

    match (state.clone(), event) {
        (_, Event::Connect(target)) => (Searching { target, elapsed: 0 }, link_down()),

        (Associated { bss, .. }, Event::Disconnect) => (
            Disconnected,
            actions([Action::SendDeauth { bssid: bss.bssid }, Action::LinkDown]),
        ),
        (_, Event::Disconnect) => (Disconnected, Actions::new()),

        (Searching { target, .. }, Event::NetworkFound { bssid, ssid, channel })
            if target.matches(bssid, &ssid) =>
        {
            let bss = Bss { bssid, channel };
            if target.adhoc {
                let (next, joined_actions) = joined(&target, bss, 0);
                let mut out = actions([Action::SetChannel(channel)]);
                for action in joined_actions {
                    let _ = out.push(action);
                }
                (next, out)
            } else {
                (
                    Authenticating { target, bss, attempts: 1, elapsed: 0 },
                    actions([Action::SetChannel(channel), Action::SendAuthRequest { bssid }]),
                )
            }
        }

        (Authenticating { target, bss, attempts, .. }, Event::AuthResponse { from, status })
            if from == bss.bssid =>
        {
            if status == STATUS_SUCCESS {
                let ssid = target.ssid.clone();
                (
                    Associating { target, bss, elapsed: 0 },
                    actions([Action::SendAssocRequest { bssid: bss.bssid, ssid }]),
                )
            } else if attempts < timeouts.auth_attempts {
                (
                    Authenticating { target, bss, attempts: attempts + 1, elapsed: 0 },
                    actions([Action::SendAuthRequest { bssid: bss.bssid }]),
                )
            } else {
                (CannotConnect(Failure::AuthRejected(status)), Actions::new())
            }
        }

        (Associating { target, bss, .. }, Event::AssocResponse { from, status, aid })
            if from == bss.bssid =>
        {
            if status == STATUS_SUCCESS {
                joined(&target, bss, aid)
            } else {
                (CannotConnect(Failure::AssocRejected(status)), Actions::new())
            }
        }

        (AcquiringAddress { bss, aid, .. }, Event::AddressAcquired) => (
            Associated { bss, aid, since_beacon: 0 },
            actions([Action::LinkUp { bssid: bss.bssid, aid }]),
        ),

        (Associated { bss, aid, .. }, Event::NetworkFound { bssid, .. }) if bssid == bss.bssid => {
            (Associated { bss, aid, since_beacon: 0 }, Actions::new())
        }

        (
            current @ (Authenticating { .. } | Associating { .. } | AcquiringAddress { .. } | Associated { .. }),
            Event::Deauthenticated { from } | Event::Disassociated { from },
        ) => match current.bss() {
            Some(bss) if bss.bssid == from => {
                if current.is_associated() {
                    (Disconnected, actions([Action::LinkDown]))
                } else {
                    (CannotConnect(Failure::Deauthenticated), Actions::new())
                }
            }
            _ => (current, Actions::new()),
        },

        (current, Event::Tick) => tick(current, timeouts),

        (current, _) => (current, Actions::new()),
    }
}

fn tick(state: State, timeouts: &Timeouts) -> (State, Actions) {
    use State::*;

    let expired = |elapsed: u32, budget: u32| elapsed.saturating_add(1) >= budget;
    match state {
        Searching { target, elapsed } => {
            if expired(elapsed, timeouts.search_ticks) {
                (CannotConnect(Failure::NotFound), Actions::new())
            } else {
                (Searching { target, elapsed: elapsed.saturating_add(1) }, Actions::new())
            }
        }
        Authenticating { target, bss, attempts, elapsed } => {
            if expired(elapsed, timeouts.auth_ticks) {
                (CannotConnect(Failure::AuthTimeout), Actions::new())
            } else {
                let elapsed = elapsed.saturating_add(1);
                (Authenticating { target, bss, attempts, elapsed }, Actions::new())
            }
        }
        Associating { target, bss, elapsed } => {
            if expired(elapsed, timeouts.assoc_ticks) {
                (CannotConnect(Failure::AssocTimeout), Actions::new())
            } else {
                (Associating { target, bss, elapsed: elapsed.saturating_add(1) }, Actions::new())
            }
        }
        AcquiringAddress { bss, aid, elapsed } => {
            if expired(elapsed, timeouts.address_ticks) {
                (CannotConnect(Failure::AddressTimeout), Actions::new())
            } else {
                (AcquiringAddress { bss, aid, elapsed: elapsed.saturating_add(1) }, Actions::new())
            }
        }
        Associated { bss, aid, since_beacon } => {
            if timeouts.link_loss_ticks != 0 && expired(since_beacon, timeouts.link_loss_ticks) {
                (Disconnected, actions([Action::LinkDown]))
            } else {
                (Associated { bss, aid, since_beacon: since_beacon.saturating_add(1) }, Actions::new())
            }
        }
        other => (other, Actions::new()),
    }
}

/// Owns the current state and applies [transition].
#[derive(Debug, Clone, Default)]
pub struct AssociationEngine {
    state: State,
    timeouts: Timeouts,
}

impl AssociationEngine {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            state: State::Disconnected,
            timeouts,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn status(&self) -> AssocStatus {
        self.state.status()
    }

    pub fn handle(&mut self, event: Event) -> Actions {
        let current = core::mem::take(&mut self.state);
        let before = current.status();
        let (next, actions) = transition(current, event, &self.timeouts);
        if next.status() != before {
            debug!("assoc: {:?} -> {:?}", before, next.status());
        }
        if let State::CannotConnect(reason) = &next {
            if before != AssocStatus::CannotConnect {
                warn!("assoc: cannot connect ({:?})", reason);
            }
        }
        self.state = next;
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AP: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
    const OTHER: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);

    fn target() -> Target {
        Target {
            ssid: Ssid::try_from("home").unwrap(),
            ..Default::default()
        }
    }

    fn found(bssid: MacAddr, ssid: &str) -> Event {
        Event::NetworkFound {
            bssid,
            ssid: Ssid::try_from(ssid).unwrap(),
            channel: 6,
        }
    }

    fn engine_in_auth() -> AssociationEngine {
        let mut engine = AssociationEngine::new(Timeouts::default());
        engine.handle(Event::Connect(target()));
        engine.handle(found(AP, "home"));
        assert_eq!(engine.status(), AssocStatus::Authenticating);
        engine
    }

    fn engine_associated(acquire_address: bool) -> AssociationEngine {
        let mut engine = AssociationEngine::new(Timeouts::default());
        engine.handle(Event::Connect(Target {
            acquire_address,
            ..target()
        }));
        engine.handle(found(AP, "home"));
        engine.handle(Event::AuthResponse { from: AP, status: 0 });
        engine.handle(Event::AssocResponse { from: AP, status: 0, aid: 1 });
        engine
    }

    #[test]
    fn test_full_join() {
        let mut engine = AssociationEngine::new(Timeouts::default());
        assert!(engine.handle(Event::Connect(target())).is_empty());
        assert_eq!(engine.status(), AssocStatus::Searching);

        // Other networks are ignored while searching.
        assert!(engine.handle(found(OTHER, "cafe")).is_empty());
        assert_eq!(engine.status(), AssocStatus::Searching);

        let out = engine.handle(found(AP, "home"));
        assert_eq!(
            out.as_slice(),
            &[Action::SetChannel(6), Action::SendAuthRequest { bssid: AP }]
        );

        let out = engine.handle(Event::AuthResponse { from: AP, status: 0 });
        assert_eq!(
            out.as_slice(),
            &[Action::SendAssocRequest { bssid: AP, ssid: target().ssid }]
        );
        assert_eq!(engine.status(), AssocStatus::Associating);

        let out = engine.handle(Event::AssocResponse { from: AP, status: 0, aid: 5 });
        assert_eq!(out.as_slice(), &[Action::LinkUp { bssid: AP, aid: 5 }]);
        assert!(engine.state().is_associated());
    }

    #[test]
    fn test_no_auth_response_cannot_connect() {
        let mut engine = engine_in_auth();
        for _ in 0..Timeouts::default().auth_ticks - 1 {
            engine.handle(Event::Tick);
            assert_eq!(engine.status(), AssocStatus::Authenticating);
        }
        engine.handle(Event::Tick);
        assert_eq!(engine.state(), &State::CannotConnect(Failure::AuthTimeout));

        // Terminal until a new request.
        engine.handle(Event::Tick);
        engine.handle(Event::AuthResponse { from: AP, status: 0 });
        assert_eq!(engine.status(), AssocStatus::CannotConnect);
        engine.handle(Event::Connect(target()));
        assert_eq!(engine.status(), AssocStatus::Searching);
    }

    #[test]
    fn test_search_timeout() {
        let timeouts = Timeouts {
            search_ticks: 3,
            ..Default::default()
        };
        let (mut state, _) = transition(State::Disconnected, Event::Connect(target()), &timeouts);
        for _ in 0..3 {
            state = transition(state, Event::Tick, &timeouts).0;
        }
        assert_eq!(state, State::CannotConnect(Failure::NotFound));
    }

    #[test]
    fn test_auth_rejection_retries_then_fails() {
        let mut engine = engine_in_auth();
        let out = engine.handle(Event::AuthResponse { from: AP, status: 13 });
        assert_eq!(out.as_slice(), &[Action::SendAuthRequest { bssid: AP }]);
        engine.handle(Event::AuthResponse { from: AP, status: 13 });
        assert_eq!(engine.status(), AssocStatus::Authenticating);
        engine.handle(Event::AuthResponse { from: AP, status: 13 });
        assert_eq!(engine.state(), &State::CannotConnect(Failure::AuthRejected(13)));
    }

    #[test]
    fn test_responses_from_other_stations_ignored() {
        let mut engine = engine_in_auth();
        assert!(engine.handle(Event::AuthResponse { from: OTHER, status: 0 }).is_empty());
        assert!(engine.handle(Event::Deauthenticated { from: OTHER }).is_empty());
        assert_eq!(engine.status(), AssocStatus::Authenticating);
    }

    #[test]
    fn test_assoc_rejection() {
        let mut engine = engine_in_auth();
        engine.handle(Event::AuthResponse { from: AP, status: 0 });
        engine.handle(Event::AssocResponse { from: AP, status: 17, aid: 0 });
        assert_eq!(engine.state(), &State::CannotConnect(Failure::AssocRejected(17)));
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let timeouts = Timeouts::default();
        let bss = Bss { bssid: AP, channel: 6 };
        let states = [
            State::Disconnected,
            State::Searching { target: target(), elapsed: 4 },
            State::Authenticating { target: target(), bss, attempts: 2, elapsed: 1 },
            State::Associating { target: target(), bss, elapsed: 0 },
            State::AcquiringAddress { bss, aid: 1, elapsed: 9 },
            State::Associated { bss, aid: 1, since_beacon: 0 },
            State::CannotConnect(Failure::AuthTimeout),
        ];
        for state in states {
            let was_associated = state.is_associated();
            let (next, out) = transition(state, Event::Disconnect, &timeouts);
            assert_eq!(next, State::Disconnected);
            assert_eq!(next.bss(), None);
            assert_eq!(out.contains(&Action::LinkDown), was_associated);
        }
    }

    #[test]
    fn test_adhoc_skips_handshake() {
        let mut engine = AssociationEngine::new(Timeouts::default());
        engine.handle(Event::Connect(Target {
            adhoc: true,
            bssid: AP,
            ..Default::default()
        }));
        let out = engine.handle(found(AP, "any"));
        assert_eq!(
            out.as_slice(),
            &[Action::SetChannel(6), Action::LinkUp { bssid: AP, aid: 0 }]
        );
        assert!(engine.state().is_associated());
    }

    #[test]
    fn test_address_acquisition_gates_link_up() {
        let mut engine = engine_associated(true);
        assert_eq!(engine.status(), AssocStatus::AcquiringAddress);
        let out = engine.handle(Event::AddressAcquired);
        assert_eq!(out.as_slice(), &[Action::LinkUp { bssid: AP, aid: 1 }]);
        assert_eq!(engine.status(), AssocStatus::Associated);
    }

    #[test]
    fn test_leaving_associated_drops_link() {
        let mut engine = engine_associated(false);
        let out = engine.handle(Event::Deauthenticated { from: AP });
        assert_eq!(out.as_slice(), &[Action::LinkDown]);
        assert_eq!(engine.status(), AssocStatus::Disconnected);

        let mut engine = engine_associated(false);
        let out = engine.handle(Event::Connect(target()));
        assert_eq!(out.as_slice(), &[Action::LinkDown]);
        assert_eq!(engine.status(), AssocStatus::Searching);
    }

    #[test]
    fn test_link_loss_and_beacon_refresh() {
        let timeouts = Timeouts {
            link_loss_ticks: 3,
            ..Default::default()
        };
        let bss = Bss { bssid: AP, channel: 6 };
        let mut state = State::Associated { bss, aid: 1, since_beacon: 0 };
        state = transition(state, Event::Tick, &timeouts).0;
        state = transition(state, Event::Tick, &timeouts).0;
        state = transition(state, found(AP, "home"), &timeouts).0;
        assert_eq!(state, State::Associated { bss, aid: 1, since_beacon: 0 });

        for _ in 0..2 {
            state = transition(state, Event::Tick, &timeouts).0;
        }
        let (state, out) = transition(state, Event::Tick, &timeouts);
        assert_eq!(state, State::Disconnected);
        assert_eq!(out.as_slice(), &[Action::LinkDown]);
    }

    #[test]
    fn test_link_loss_disabled_counter_saturates() {
        let timeouts = Timeouts {
            link_loss_ticks: 0,
            ..Default::default()
        };
        let bss = Bss { bssid: AP, channel: 6 };
        let state = State::Associated { bss, aid: 1, since_beacon: u32::MAX };
        let (state, out) = transition(state, Event::Tick, &timeouts);
        assert_eq!(state, State::Associated { bss, aid: 1, since_beacon: u32::MAX });
        assert!(out.is_empty());
    }

    #[test]
    fn test_timeouts_deserialize_with_defaults() {
        let timeouts: Timeouts = serde_json::from_str(r#"{"auth_ticks": 5}"#).unwrap();
        assert_eq!(timeouts.auth_ticks, 5);
        assert_eq!(timeouts.search_ticks, Timeouts::default().search_ticks);
    }
}
