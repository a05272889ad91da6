// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Configuration surface for the network core, per spec.md §6.
use crate::types::{ClientMode, CountryCode};
use std::time::Duration;

/// Core mutex try-lock budget for the 1 Hz timer (spec.md §5).
pub const TICK_TRY_LOCK: Duration = Duration::from_millis(150);

/// Core mutex try-lock budget for incoming-connection admission (spec.md §5).
pub const ACCEPT_TRY_LOCK: Duration = Duration::from_millis(50);

/// Default TTL for a routing table entry (spec.md §3, I-invariant on Routing Entry).
pub const ROUTE_TTL: Duration = Duration::from_secs(600);

/// Interval at which stale routes are swept, reset after every sweep.
pub const CLEAN_ROUTES_INTERVAL: Duration = Duration::from_secs(60);

/// Hub balancing runs on this cadence and treats it as the "mode change" grace period.
pub const HUB_BALANCING_INTERVAL: Duration = Duration::from_secs(1800);

/// Minutes of zero hub connections before an emergency switch to Hub mode (spec.md §4.7).
pub const EMERGENCY_HUB_SWITCH_MINUTES: u32 = 10;

/// Consecutive `minutes_below_50` before a loaded Hub considers downgrading.
pub const DOWNGRADE_TIMEOUT_MINUTES: u32 = 60;

/// Consecutive `minutes_above_90` before a Leaf considers upgrading.
pub const UPGRADE_TIMEOUT_MINUTES: u32 = 30;

/// Global packet budget consumed by all active searches in a single tick (spec.md I6).
pub const DEFAULT_SEARCH_PACKET_BUDGET: u32 = 8;

/// Packet cap applied to a search during its first 30s of life (slow-start).
pub const SEARCH_SLOW_START_WINDOW: Duration = Duration::from_secs(30);
pub const SEARCH_SLOW_START_CAP: u32 = 2;

/// A neighbour must have been attached at least this long before a managed
/// search will query it.
pub const NEIGHBOUR_MIN_ATTACH_AGE: Duration = Duration::from_secs(15);

/// Handshake timeout before a CONNECTING/HANDSHAKING neighbour is dropped.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Keepalive cadence for a CONNECTED neighbour's per-peer ping (spec.md §4.4,
/// "Per-peer tick").
pub const NEIGHBOUR_PING_PERIOD: Duration = Duration::from_secs(30);

/// A CONNECTED neighbour with no traffic at all for this long is dropped
/// (spec.md §4.4, "Per-peer tick").
pub const NEIGHBOUR_IDLE_READ_TIMEOUT: Duration = Duration::from_secs(180);

/// The network-wide configuration surface. One value lives in the
/// `NetworkCore` and is read (never mutated concurrently with a tick) by
/// every component.
#[derive(Debug, Clone)]
pub struct NetworkCoreConfig {
    pub port: u16,
    pub in_speed: u32,
    pub out_speed: u32,
    pub client_mode: ClientMode,
    pub num_hubs: u32,
    pub num_peers: u32,
    pub num_leafs: u32,
    pub connect_factor: f64,
    pub query_limit: u32,
    pub query_host_throttle: Duration,
    pub requery_delay: Duration,
    pub host_current: Duration,
    pub query_key_time: Duration,
    pub khl_hub_count: usize,
    pub khl_period: Duration,
    pub lni_minimum_update: Duration,
    pub adaptive_hub: bool,
    pub adaptive_check_period: u32,
    pub adaptive_max_ping: Duration,
    pub adaptive_busy_percentage: u32,
    pub adaptive_time_window: u32,
    pub adaptive_minimum_leaves: u32,
    pub max_results: u32,
    pub preferred_countries: Vec<CountryCode>,
}

impl Default for NetworkCoreConfig {
    fn default() -> Self {
        Self {
            port: 6346,
            in_speed: 2_000_000,
            out_speed: 128_000,
            client_mode: ClientMode::Auto,
            num_hubs: 2,
            num_peers: 32,
            num_leafs: 128,
            connect_factor: 2.0,
            query_limit: 128,
            query_host_throttle: Duration::from_secs(20),
            requery_delay: Duration::from_secs(180),
            host_current: Duration::from_secs(6 * 3600),
            query_key_time: Duration::from_secs(3 * 3600),
            khl_hub_count: 20,
            khl_period: Duration::from_secs(14400),
            lni_minimum_update: Duration::from_secs(60),
            adaptive_hub: true,
            adaptive_check_period: 5,
            adaptive_max_ping: Duration::from_millis(1500),
            adaptive_busy_percentage: 50,
            adaptive_time_window: 12,
            adaptive_minimum_leaves: 32,
            max_results: 200,
            preferred_countries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_constants() {
        let cfg = NetworkCoreConfig::default();
        assert_eq!(cfg.client_mode, ClientMode::Auto);
        assert_eq!(cfg.khl_hub_count, 20);
        assert!(cfg.preferred_countries.is_empty());
    }
}
