// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The Routing Table (spec.md §4.2): GUID → (neighbour | UDP endpoint) with
//! TTL expiry. Never a GC root for neighbours (it stores a `NeighbourId`,
//! validated for liveness by the caller on lookup, spec.md §9, "cyclic
//! references").

use crate::types::{Endpoint, Guid, NeighbourId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Where a routing entry points. At most one of the two is ever populated,
/// modelled here as a sum type so that state is unrepresentable rather than
/// merely disallowed by convention (spec.md §3, Routing Entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Neighbour(NeighbourId),
    Udp(Endpoint),
}

#[derive(Debug, Clone)]
struct RouteEntry {
    target: RouteTarget,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: HashMap<Guid, RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a routing entry. On conflict: a neighbour-backed entry
    /// supersedes a UDP-backed one; otherwise the new entry replaces the old
    /// and resets `inserted_at` (spec.md §4.2, "Tie-break").
    pub fn insert(&mut self, guid: Guid, target: RouteTarget, now: Instant) {
        if let Some(existing) = self.entries.get(&guid) {
            let existing_is_neighbour = matches!(existing.target, RouteTarget::Neighbour(_));
            let new_is_udp = matches!(target, RouteTarget::Udp(_));
            if existing_is_neighbour && new_is_udp {
                debug!(%guid, "keeping neighbour-backed route over new udp route");
                return;
            }
        }
        self.entries.insert(guid, RouteEntry { target, inserted_at: now });
    }

    pub fn find(&self, guid: &Guid) -> Option<RouteTarget> {
        self.entries.get(guid).map(|e| e.target)
    }

    /// Purges all entries pointing at `neighbour` (spec.md §4.2, "remove").
    /// Atomic from the caller's perspective since it runs under the core
    /// mutex, same as every other routing-table mutation.
    pub fn remove_neighbour(&mut self, neighbour: NeighbourId) {
        self.entries
            .retain(|_, e| e.target != RouteTarget::Neighbour(neighbour));
    }

    /// Drops entries older than `ttl` (spec.md §4.2, "expire_old").
    pub fn expire_old(&mut self, now: Instant, ttl: Duration) {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.inserted_at) <= ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "expired stale routing entries");
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn udp(n: u8) -> RouteTarget {
        RouteTarget::Udp(Endpoint::new(Ipv4Addr::new(n, n, n, n), 6346))
    }

    #[test]
    fn insert_remove_round_trips() {
        let mut table = RoutingTable::new();
        let guid = Guid::new();
        let now = Instant::now();
        table.insert(guid, RouteTarget::Neighbour(NeighbourId(1)), now);
        table.remove_neighbour(NeighbourId(1));
        assert_eq!(table.find(&guid), None);
    }

    #[test]
    fn neighbour_backed_entry_beats_udp_on_conflict() {
        let mut table = RoutingTable::new();
        let guid = Guid::new();
        let now = Instant::now();
        table.insert(guid, RouteTarget::Neighbour(NeighbourId(1)), now);
        table.insert(guid, udp(9), now);
        assert_eq!(table.find(&guid), Some(RouteTarget::Neighbour(NeighbourId(1))));
    }

    #[test]
    fn udp_backed_entry_is_replaced_by_a_newer_udp_entry() {
        let mut table = RoutingTable::new();
        let guid = Guid::new();
        let now = Instant::now();
        table.insert(guid, udp(1), now);
        table.insert(guid, udp(2), now);
        assert_eq!(table.find(&guid), Some(udp(2)));
    }

    #[test]
    fn expire_old_drops_entries_past_ttl() {
        let mut table = RoutingTable::new();
        let guid = Guid::new();
        let now = Instant::now();
        table.insert(guid, udp(1), now);
        let later = now + Duration::from_secs(601);
        table.expire_old(later, Duration::from_secs(600));
        assert_eq!(table.find(&guid), None);
    }

    #[test]
    fn remove_neighbour_purges_only_its_own_entries() {
        let mut table = RoutingTable::new();
        let now = Instant::now();
        let g1 = Guid::new();
        let g2 = Guid::new();
        table.insert(g1, RouteTarget::Neighbour(NeighbourId(1)), now);
        table.insert(g2, RouteTarget::Neighbour(NeighbourId(2)), now);
        table.remove_neighbour(NeighbourId(1));
        assert_eq!(table.find(&g1), None);
        assert!(table.find(&g2).is_some());
    }

    // spec.md §8, "Laws": `insert(g, n); remove(n); find(g) = none`, for any
    // neighbour id, holds independently of how many unrelated entries share
    // the table.
    quickcheck::quickcheck! {
        fn insert_remove_round_trips_for_any_neighbour_id(raw_id: u64, other_ids: Vec<u64>) -> bool {
            let mut table = RoutingTable::new();
            let now = Instant::now();
            let id = NeighbourId(raw_id);

            for other in &other_ids {
                if *other != raw_id {
                    table.insert(Guid::new(), RouteTarget::Neighbour(NeighbourId(*other)), now);
                }
            }

            let guid = Guid::new();
            table.insert(guid, RouteTarget::Neighbour(id), now);
            table.remove_neighbour(id);
            table.find(&guid) == None
        }
    }
}
