// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The Neighbour State Machine (spec.md §4.4).

use crate::config::{HANDSHAKE_TIMEOUT, NEIGHBOUR_MIN_ATTACH_AGE};
use crate::types::{Endpoint, NeighbourId, NeighbourState, Role};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A peer session. Owned exclusively by the Network Controller's neighbour
/// set; dropped only through `remove_neighbour` (spec.md §3).
#[derive(Debug, Clone)]
pub struct Neighbour {
    pub id: NeighbourId,
    pub endpoint: Endpoint,
    pub role: Role,
    pub state: NeighbourState,
    pub connected_at: Instant,
    pub last_query_at: Option<Instant>,
    pub rtt: Duration,
    pub pings_in_flight: u32,
    pub leaf_count: u32,
    pub leaf_max: u32,
    pub is_core_impl: bool,
    pub cached_keys: bool,
    /// Monotonic per-tick stamp guarding against re-entrant addition during
    /// a `maintain()` walk (spec.md §9, "reentrant walks using a cookie").
    pub tick_cookie: u64,

    handshake_started_at: Instant,
    last_ping_sent_at: Option<Instant>,
    last_read_at: Instant,
    last_key_request_at: Option<Instant>,
}

/// What the per-peer tick decided should happen to this neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    SendPing,
    Close,
}

impl Neighbour {
    pub fn new(id: NeighbourId, endpoint: Endpoint, now: Instant) -> Self {
        Self {
            id,
            endpoint,
            role: Role::Unknown,
            state: NeighbourState::Connecting,
            connected_at: now,
            last_query_at: None,
            rtt: Duration::from_secs(0),
            pings_in_flight: 0,
            leaf_count: 0,
            leaf_max: 0,
            is_core_impl: false,
            cached_keys: false,
            tick_cookie: 0,
            handshake_started_at: now,
            last_ping_sent_at: None,
            last_read_at: now,
            last_key_request_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == NeighbourState::Connected
    }

    pub fn attached_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.connected_at)
    }

    pub fn is_eligible_for_query(&self, now: Instant, query_host_throttle: Duration) -> bool {
        self.is_connected()
            && self.attached_for(now) >= NEIGHBOUR_MIN_ATTACH_AGE
            && self
                .last_query_at
                .map(|t| now.saturating_duration_since(t) > query_host_throttle)
                .unwrap_or(true)
    }

    /// `handshake negotiates HUB vs LEAF role` (spec.md §4.4, "Adopting a
    /// promoted role"). Moves the neighbour to CONNECTED.
    pub fn adopt_role(&mut self, role: Role) {
        self.role = role;
        self.state = NeighbourState::Connected;
    }

    pub fn record_ping_sent(&mut self, now: Instant) {
        self.pings_in_flight += 1;
        self.last_ping_sent_at = Some(now);
    }

    /// Pairs an echo response with its send timestamp to measure RTT
    /// (spec.md §4.4, "Per-peer tick").
    pub fn record_pong(&mut self, now: Instant) {
        if let Some(sent_at) = self.last_ping_sent_at.take() {
            self.rtt = now.saturating_duration_since(sent_at);
        }
        self.pings_in_flight = self.pings_in_flight.saturating_sub(1);
        self.last_read_at = now;
    }

    pub fn record_read(&mut self, now: Instant) {
        self.last_read_at = now;
    }

    pub fn record_query_sent(&mut self, now: Instant) {
        self.last_query_at = Some(now);
    }

    pub fn last_key_request_at(&self) -> Option<Instant> {
        self.last_key_request_at
    }

    pub fn record_key_request(&mut self, now: Instant) {
        self.last_key_request_at = Some(now);
    }

    /// Advances handshake timers, decides whether a ping is due, and
    /// applies read deadlines (spec.md §4.4, "Per-peer tick"). Runs with the
    /// core mutex held; must not block.
    pub fn tick(&mut self, now: Instant, ping_period: Duration, idle_read_timeout: Duration) -> TickOutcome {
        match self.state {
            NeighbourState::Connecting | NeighbourState::Handshaking => {
                if now.saturating_duration_since(self.handshake_started_at) > HANDSHAKE_TIMEOUT {
                    warn!(endpoint = %self.endpoint, "handshake timed out");
                    self.state = NeighbourState::Closing;
                    return TickOutcome::Close;
                }
                TickOutcome::Continue
            }
            NeighbourState::Connected => {
                if now.saturating_duration_since(self.last_read_at) > idle_read_timeout {
                    warn!(endpoint = %self.endpoint, "idle read timeout");
                    self.state = NeighbourState::Closing;
                    return TickOutcome::Close;
                }
                let ping_due = self
                    .last_ping_sent_at
                    .map(|t| now.saturating_duration_since(t) >= ping_period)
                    .unwrap_or(true);
                if ping_due {
                    debug!(endpoint = %self.endpoint, "ping due");
                    TickOutcome::SendPing
                } else {
                    TickOutcome::Continue
                }
            }
            NeighbourState::Closing => TickOutcome::Close,
        }
    }

    pub fn close(&mut self) {
        self.state = NeighbourState::Closing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn nbr(now: Instant) -> Neighbour {
        Neighbour::new(NeighbourId(1), Endpoint::new(Ipv4Addr::new(1, 2, 3, 4), 6346), now)
    }

    #[test]
    fn handshake_times_out_after_15s() {
        let start = Instant::now();
        let mut n = nbr(start);
        let later = start + Duration::from_secs(16);
        assert_eq!(
            n.tick(later, Duration::from_secs(30), Duration::from_secs(60)),
            TickOutcome::Close
        );
        assert_eq!(n.state, NeighbourState::Closing);
    }

    #[test]
    fn connected_neighbour_pings_on_schedule() {
        let start = Instant::now();
        let mut n = nbr(start);
        n.adopt_role(Role::Hub);
        let later = start + Duration::from_secs(31);
        assert_eq!(
            n.tick(later, Duration::from_secs(30), Duration::from_secs(600)),
            TickOutcome::SendPing
        );
    }

    #[test]
    fn rtt_is_measured_from_ping_to_pong() {
        let start = Instant::now();
        let mut n = nbr(start);
        n.adopt_role(Role::Hub);
        n.record_ping_sent(start);
        let pong_at = start + Duration::from_millis(120);
        n.record_pong(pong_at);
        assert_eq!(n.rtt, Duration::from_millis(120));
        assert_eq!(n.pings_in_flight, 0);
    }

    #[test]
    fn not_eligible_for_query_before_minimum_attach_age() {
        let start = Instant::now();
        let mut n = nbr(start);
        n.adopt_role(Role::Hub);
        assert!(!n.is_eligible_for_query(start + Duration::from_secs(5), Duration::from_secs(20)));
        assert!(n.is_eligible_for_query(start + Duration::from_secs(20), Duration::from_secs(20)));
    }
}
