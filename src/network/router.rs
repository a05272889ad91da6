// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Packet routing decisions (spec.md §4.2). This module is deliberately
//! pure: it decides *where* a packet should go, and the caller (the
//! `NetworkCore` tick/accept paths) performs the actual send through the
//! injected transports. Keeping the decision side effect-free is what makes
//! the trust matrix (P3 in spec.md §8) exhaustively unit-testable.

use super::routing::{RouteTarget, RoutingTable};
use crate::types::{Endpoint, Guid, NeighbourId, Role};

/// Where a packet received from this source counts as having come from, for
/// the purposes of the trust matrix in spec.md §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Udp,
    Neighbour(Role),
}

/// The outcome of a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    ForwardTcp(NeighbourId),
    ForwardUdp(Endpoint),
    /// The GUID is known but no channel is trusted for this source: drop
    /// silently (spec.md §4.2, "route_packet_through").
    Drop,
    /// The GUID is absent, is our own, or is entirely unknown: the caller
    /// should treat the packet as locally addressed / unroutable.
    NotRouted,
}

/// `route_packet(target_guid, packet)`: unconditional forward, used when the
/// caller already knows it wants to hand the packet off rather than consume
/// it locally (e.g. flushing the pending-hits queue).
pub fn route_packet(table: &RoutingTable, target_guid: &Guid) -> RouteDecision {
    match table.find(target_guid) {
        Some(RouteTarget::Neighbour(id)) => RouteDecision::ForwardTcp(id),
        Some(RouteTarget::Udp(ep)) => RouteDecision::ForwardUdp(ep),
        None => RouteDecision::Drop,
    }
}

/// `route_packet_through(packet, from_neighbour?)`: applies the trust matrix
/// from spec.md §4.2.
///
/// | Received from | TCP forward | UDP forward |
/// |---|---|---|
/// | UDP            | yes | no  |
/// | LEAF neighbour  | yes | yes |
/// | HUB neighbour   | only to a LEAF neighbour | no |
pub fn route_packet_through(
    table: &RoutingTable,
    destination: Option<Guid>,
    local_guid: Guid,
    from: Source,
    destination_role: impl Fn(NeighbourId) -> Option<Role>,
) -> RouteDecision {
    let guid = match destination {
        Some(g) if g != local_guid => g,
        _ => return RouteDecision::NotRouted,
    };

    let target = match table.find(&guid) {
        Some(t) => t,
        None => return RouteDecision::NotRouted,
    };

    let (forward_tcp, forward_udp) = match from {
        Source::Udp => (true, false),
        Source::Neighbour(Role::Leaf) => (true, true),
        Source::Neighbour(Role::Hub) | Source::Neighbour(Role::Unknown) => {
            let target_is_leaf = matches!(target, RouteTarget::Neighbour(id) if destination_role(id) == Some(Role::Leaf));
            (target_is_leaf, false)
        }
    };

    match target {
        RouteTarget::Neighbour(id) if forward_tcp => RouteDecision::ForwardTcp(id),
        RouteTarget::Udp(ep) if forward_udp => RouteDecision::ForwardUdp(ep),
        _ => RouteDecision::Drop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Instant;

    fn ep() -> Endpoint {
        Endpoint::new(Ipv4Addr::new(1, 2, 3, 4), 6346)
    }

    #[test]
    fn route_packet_drops_unknown_guid() {
        let table = RoutingTable::new();
        assert_eq!(route_packet(&table, &Guid::new()), RouteDecision::Drop);
    }

    #[test]
    fn route_packet_prefers_neighbour_target() {
        let mut table = RoutingTable::new();
        let guid = Guid::new();
        table.insert(guid, RouteTarget::Neighbour(NeighbourId(1)), Instant::now());
        assert_eq!(route_packet(&table, &guid), RouteDecision::ForwardTcp(NeighbourId(1)));
    }

    #[test]
    fn from_udp_cannot_forward_back_to_udp() {
        let mut table = RoutingTable::new();
        let guid = Guid::new();
        table.insert(guid, RouteTarget::Udp(ep()), Instant::now());
        let local = Guid::new();
        let decision = route_packet_through(&table, Some(guid), local, Source::Udp, |_| None);
        assert_eq!(decision, RouteDecision::Drop);
    }

    #[test]
    fn from_udp_can_forward_to_neighbour_over_tcp() {
        let mut table = RoutingTable::new();
        let guid = Guid::new();
        table.insert(guid, RouteTarget::Neighbour(NeighbourId(7)), Instant::now());
        let local = Guid::new();
        let decision = route_packet_through(&table, Some(guid), local, Source::Udp, |_| Some(Role::Hub));
        assert_eq!(decision, RouteDecision::ForwardTcp(NeighbourId(7)));
    }

    #[test]
    fn from_leaf_can_forward_anywhere() {
        let mut table = RoutingTable::new();
        let guid = Guid::new();
        table.insert(guid, RouteTarget::Udp(ep()), Instant::now());
        let local = Guid::new();
        let decision = route_packet_through(
            &table,
            Some(guid),
            local,
            Source::Neighbour(Role::Leaf),
            |_| None,
        );
        assert_eq!(decision, RouteDecision::ForwardUdp(ep()));
    }

    #[test]
    fn from_hub_only_forwards_to_a_leaf_neighbour() {
        let mut table = RoutingTable::new();
        let hub_guid = Guid::new();
        let leaf_guid = Guid::new();
        table.insert(hub_guid, RouteTarget::Neighbour(NeighbourId(1)), Instant::now());
        table.insert(leaf_guid, RouteTarget::Neighbour(NeighbourId(2)), Instant::now());
        let local = Guid::new();

        let to_hub = route_packet_through(
            &table,
            Some(hub_guid),
            local,
            Source::Neighbour(Role::Hub),
            |id| if id == NeighbourId(1) { Some(Role::Hub) } else { Some(Role::Leaf) },
        );
        assert_eq!(to_hub, RouteDecision::Drop);

        let to_leaf = route_packet_through(
            &table,
            Some(leaf_guid),
            local,
            Source::Neighbour(Role::Hub),
            |id| if id == NeighbourId(1) { Some(Role::Hub) } else { Some(Role::Leaf) },
        );
        assert_eq!(to_leaf, RouteDecision::ForwardTcp(NeighbourId(2)));
    }

    #[test]
    fn destination_equal_to_local_guid_is_not_routed() {
        let table = RoutingTable::new();
        let local = Guid::new();
        let decision = route_packet_through(&table, Some(local), local, Source::Udp, |_| None);
        assert_eq!(decision, RouteDecision::NotRouted);
    }

    #[test]
    fn missing_destination_is_not_routed() {
        let table = RoutingTable::new();
        let local = Guid::new();
        let decision = route_packet_through(&table, None, local, Source::Udp, |_| None);
        assert_eq!(decision, RouteDecision::NotRouted);
    }
}
