//! Periodic beacon generation while hosting a network.
//!
//! The emitter builds a beacon from the current SSID, channel and guest
//! count and queues it into the TX ring like any other frame. The
//! controller rewrites the channel on the way out, so a stale channel here
//! is harmless.

use log::{debug, trace};

use wifi_shared::frame::{build_beacon, BeaconParams, BEACON_MAX_LEN};
use wifi_shared::state::HostWriter;
use wifi_shared::{MacAddr, Ssid};

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hosting {
    ssid: Ssid,
    game_id: u32,
}

pub struct BeaconEmitter {
    interval_ticks: u32,
    countdown: u32,
    hosting: Option<Hosting>,
}

impl BeaconEmitter {
    pub fn new(interval_ticks: u32) -> Self {
        Self {
            interval_ticks: interval_ticks.max(1),
            countdown: 0,
            hosting: None,
        }
    }

    /// Begin beaconing. The first beacon goes out on the next tick.
    pub fn start(&mut self, ssid: Ssid, game_id: u32) {
        debug!("beacon: start {} game {:#010x}", ssid, game_id);
        self.hosting = Some(Hosting { ssid, game_id });
        self.countdown = 0;
    }

    pub fn stop(&mut self) {
        if self.hosting.take().is_some() {
            debug!("beacon: stop");
        }
    }

    pub fn is_active(&self) -> bool {
        self.hosting.is_some()
    }

    /// Advance one tick, queueing a beacon when the interval elapses.
    ///
    /// Returns true if a beacon was queued. A full ring yields
    /// [SessionError::NoSpace] and the beacon is retried one interval later.
    pub fn tick(&mut self, writer: &HostWriter<'_>, own: MacAddr, channel: u8) -> Result<bool, SessionError> {
        let Some(hosting) = &self.hosting else {
            return Ok(false);
        };
        if self.countdown > 0 {
            self.countdown -= 1;
            return Ok(false);
        }
        self.countdown = self.interval_ticks - 1;

        let params = BeaconParams {
            own,
            ssid: hosting.ssid.as_bytes(),
            channel,
            game_id: hosting.game_id,
            max_guests: writer.requests().max_guests(),
        };
        let mut frame = [0u8; BEACON_MAX_LEN];
        let len = build_beacon(&params, &mut frame)?;

        let tx = writer.tx_ring();
        if len > tx.bytes_available() {
            return Err(SessionError::NoSpace);
        }
        tx.write(tx.cursor(), &frame[..len])?;
        tx.advance(len)?;
        trace!("beacon: queued {} bytes", len);
        Ok(true)
    }
}
