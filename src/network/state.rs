// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! `CoreState`: everything protected by the core mutex (spec.md §5). A single
//! `tokio::sync::Mutex<CoreState>` is the only lock most of the network core
//! ever needs; `host_cache`/`neighbours` sub-locks mentioned in spec.md §5
//! belong to the injected collaborators, not to this struct.

use super::adaptive::AdaptiveHubEvaluator;
use super::balancing::{ClusterLoad, HubBalancer};
use super::neighbour::Neighbour;
use super::rate::RateController;
use super::routing::RoutingTable;
use crate::search::SearchManager;
use crate::types::{Guid, NeighbourId, NeighbourState, Role};
use std::collections::HashMap;
use std::time::Instant;

/// Everything the network core mutates on a tick or on an incoming
/// connection. Lives behind one `tokio::sync::Mutex` in `NetworkCore`.
pub struct CoreState {
    pub local_guid: Guid,
    pub role: Role,
    pub neighbours: HashMap<NeighbourId, Neighbour>,
    next_neighbour_id: u64,
    pub routing: RoutingTable,
    pub rate: RateController,
    pub adaptive: AdaptiveHubEvaluator,
    pub balancer: HubBalancer,
    pub searches: SearchManager,
    pub last_khl_broadcast: Option<Instant>,

    /// Ticks remaining before the routing table is next swept (spec.md §4.1 step 2).
    pub clean_routes_countdown: u32,
    /// Ticks remaining before LNI is (re-)broadcast (spec.md §4.1 step 9).
    pub lni_wait: u32,
    pub need_update_lni: bool,
    /// Ticks remaining before KHL is next dispatched (spec.md §4.1 step 10).
    pub khl_wait: u32,
    /// Ticks remaining before the next `AdaptiveHubEvaluator::run` call.
    pub adaptive_next_check: u32,
    /// Ticks remaining before `HubBalancer::evaluate` runs next (spec.md §4.1 step 6).
    pub hub_balancing_countdown: u32,
    /// Bumped once per tick; stamped onto each neighbour as it is visited so
    /// a neighbour inserted mid-walk is skipped until the next tick
    /// (spec.md §9, "cookie" idiom).
    tick_cookie: u64,
}

impl CoreState {
    pub fn new(now: Instant) -> Self {
        Self {
            local_guid: Guid::new(),
            role: Role::Unknown,
            neighbours: HashMap::new(),
            next_neighbour_id: 1,
            routing: RoutingTable::new(),
            rate: RateController::new(),
            adaptive: AdaptiveHubEvaluator::new(),
            balancer: HubBalancer::new(now),
            searches: SearchManager::new(),
            last_khl_broadcast: None,
            clean_routes_countdown: 60,
            lni_wait: 60,
            need_update_lni: true,
            khl_wait: 60,
            adaptive_next_check: 0,
            hub_balancing_countdown: crate::config::HUB_BALANCING_INTERVAL.as_secs() as u32,
            tick_cookie: 0,
        }
    }

    /// Bumps and returns the per-tick walk cookie (spec.md §9).
    pub fn next_tick_cookie(&mut self) -> u64 {
        self.tick_cookie += 1;
        self.tick_cookie
    }

    pub fn allocate_neighbour_id(&mut self) -> NeighbourId {
        let id = NeighbourId(self.next_neighbour_id);
        self.next_neighbour_id += 1;
        id
    }

    pub fn insert_neighbour(&mut self, neighbour: Neighbour) {
        self.rate.add_socket(neighbour.id, neighbour.is_core_impl);
        self.neighbours.insert(neighbour.id, neighbour);
    }

    /// Removes a neighbour and everything it is a routing target for
    /// (spec.md §4.4, "remove_neighbour").
    pub fn remove_neighbour(&mut self, id: NeighbourId) -> Option<Neighbour> {
        self.rate.remove_socket(id);
        self.routing.remove_neighbour(id);
        self.neighbours.remove(&id)
    }

    pub fn find_by_endpoint(&self, ip: std::net::Ipv4Addr) -> Option<&Neighbour> {
        self.neighbours.values().find(|n| n.endpoint.ip == ip)
    }

    pub fn connected_hubs(&self) -> impl Iterator<Item = &Neighbour> {
        self.neighbours
            .values()
            .filter(|n| n.is_connected() && n.role == Role::Hub)
    }

    pub fn connected_leaves(&self) -> impl Iterator<Item = &Neighbour> {
        self.neighbours
            .values()
            .filter(|n| n.is_connected() && n.role == Role::Leaf)
    }

    pub fn hub_count(&self) -> u32 {
        self.connected_hubs().count() as u32
    }

    pub fn leaf_count(&self) -> u32 {
        self.connected_leaves().count() as u32
    }

    /// Aggregates leaf occupancy across our connected hub peers plus
    /// ourselves, for the hub balancer (spec.md §4.7, "cluster load").
    pub fn cluster_load(&self, our_cap: u32) -> ClusterLoad {
        let mut cluster_leaves = 0u32;
        let mut cluster_cap = 0u32;
        for hub in self.connected_hubs() {
            cluster_leaves += hub.leaf_count;
            cluster_cap += hub.leaf_max;
        }
        let our_leaves = self.leaf_count();
        if self.role == Role::Hub {
            cluster_leaves += our_leaves;
            cluster_cap += our_cap;
        }
        ClusterLoad {
            cluster_leaves,
            cluster_cap,
            our_leaves,
            our_cap,
        }
    }

    /// Clears every neighbour and every routing entry, for a full role
    /// switch or a user-initiated disconnect (spec.md §4.1, "Disconnect").
    pub fn clear_neighbours(&mut self) {
        let ids: Vec<NeighbourId> = self.neighbours.keys().copied().collect();
        for id in ids {
            self.remove_neighbour(id);
        }
    }

    pub fn neighbours_to_close(&self) -> Vec<NeighbourId> {
        self.neighbours
            .iter()
            .filter(|(_, n)| n.state == NeighbourState::Closing)
            .map(|(id, _)| *id)
            .collect()
    }
}
