// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The Search Manager: a registry of `ManagedSearch`es polled by the
//! Network Tick under one shared packet-budget token bucket (spec.md I6,
//! §4.1 step 8). Grounded on `managedsearch.cpp`'s `SearchManager` global and
//! on the teacher's `HashMap`-registry idiom in `sn_networking/src/get_record_handler.rs`.

use super::managed_search::{HitIngestOutcome, ManagedSearch};
use crate::config::NetworkCoreConfig;
use crate::interfaces::{DatagramTransport, HostCache, NeighbourLink};
use crate::network::neighbour::Neighbour;
use crate::packet::Packet;
use crate::types::{Endpoint, Guid, NeighbourId};
use std::collections::HashMap;
use std::time::{Instant, SystemTime};
use tracing::debug;

#[derive(Debug, Default)]
pub struct SearchManager {
    searches: HashMap<Guid, ManagedSearch>,
}

impl SearchManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.searches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.searches.is_empty()
    }

    /// Registers a new active search and returns its GUID (spec.md §4.5,
    /// "start() … registers with the Search Manager").
    pub fn add(&mut self, query: Packet, now: Instant, config: &NetworkCoreConfig) -> Guid {
        let search = ManagedSearch::new(query, now, config);
        let guid = search.guid;
        self.searches.insert(guid, search);
        guid
    }

    pub fn pause(&mut self, guid: Guid) {
        if let Some(search) = self.searches.get_mut(&guid) {
            search.pause();
        }
    }

    pub fn resume(&mut self, guid: Guid, config: &NetworkCoreConfig) {
        if let Some(search) = self.searches.get_mut(&guid) {
            search.start(config);
        }
    }

    /// Deregisters the search entirely (spec.md §4.5, `stop()`).
    pub fn remove(&mut self, guid: Guid) {
        if let Some(mut search) = self.searches.remove(&guid) {
            search.stop();
        }
    }

    pub fn on_query_hit(&mut self, guid: Guid, count: u32) -> Option<HitIngestOutcome> {
        self.searches.get_mut(&guid).map(|s| s.on_query_hit(count))
    }

    /// One Network Tick's worth of search work (spec.md §4.1 step 8):
    /// every active search gets a turn against the same shrinking
    /// `max_packets` budget, so the sum of packets sent across all searches
    /// this tick never exceeds it (P6).
    #[allow(clippy::too_many_arguments)]
    pub async fn on_timer(
        &mut self,
        now: Instant,
        now_wall: SystemTime,
        config: &NetworkCoreConfig,
        neighbours: &mut HashMap<NeighbourId, Neighbour>,
        local_endpoint: Option<Endpoint>,
        host_cache: &dyn HostCache,
        datagrams: &dyn DatagramTransport,
        links: &dyn NeighbourLink,
    ) {
        let mut budget = crate::config::DEFAULT_SEARCH_PACKET_BUDGET;
        let total = self.searches.len();
        for search in self.searches.values_mut() {
            if budget == 0 {
                break;
            }
            search
                .tick(now, now_wall, config, &mut budget, neighbours, local_endpoint, host_cache, datagrams, links)
                .await;
        }
        debug!(total, remaining_budget = budget, "search manager tick complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketBuilder;

    fn cfg() -> NetworkCoreConfig {
        NetworkCoreConfig::default()
    }

    #[test]
    fn add_registers_and_remove_deregisters() {
        let mut mgr = SearchManager::new();
        let guid = mgr.add(PacketBuilder::new("Q2").build(), Instant::now(), &cfg());
        assert_eq!(mgr.len(), 1);
        mgr.remove(guid);
        assert!(mgr.is_empty());
    }

    #[test]
    fn pause_and_resume_round_trip_through_the_registry() {
        let mut mgr = SearchManager::new();
        let guid = mgr.add(PacketBuilder::new("Q2").build(), Instant::now(), &cfg());
        mgr.pause(guid);
        mgr.resume(guid, &cfg());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn on_query_hit_is_a_no_op_for_an_unknown_guid() {
        let mut mgr = SearchManager::new();
        assert_eq!(mgr.on_query_hit(Guid::new(), 5), None);
    }
}
