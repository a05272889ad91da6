// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Traits for the external collaborators enumerated in spec.md §6. The core
//! is generic over these (held as `Arc<dyn Trait>`) rather than owning
//! sockets, TLS, a host cache file, or GeoIP data directly (those concerns
//! are explicitly out of scope, spec.md §1) and are injected by the host
//! application, the same dependency-inversion shape the teacher uses at its
//! libp2p behaviour boundary.

use crate::packet::Packet;
use crate::types::{CountryCode, Endpoint};
use async_trait::async_trait;
use std::time::SystemTime;

/// The datagram (UDP) transport. Acknowledged sends carry their own
/// retry/backoff internal to the transport (spec.md §6).
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    async fn listen(&self) -> std::io::Result<()>;
    async fn disconnect(&self);
    fn is_listening(&self) -> bool;
    fn is_firewalled(&self) -> bool;
    async fn send_packet(&self, to: Endpoint, packet: Packet, acked: bool);
    /// Signals the transport to flush whatever it has queued.
    fn flush_send_queue(&self);
}

/// The TCP handshake listener. `on_accept` is an upcall path the transport
/// drives; the core only exposes what it needs of the listener itself here.
#[async_trait]
pub trait HandshakeListener: Send + Sync {
    async fn listen(&self) -> std::io::Result<()>;
    async fn disconnect(&self);
    fn is_listening(&self) -> bool;
    fn is_firewalled(&self) -> bool;
    /// Dials an outbound TCP connection; the handshake itself runs on the
    /// listener's own I/O and reaches the core later through
    /// `on_incoming_connection`-style admission (spec.md §4.1, `connect_to`).
    /// Socket/TLS plumbing is out of scope (spec.md §1); this is fire-and-forget.
    async fn connect_to(&self, endpoint: Endpoint);
}

/// The per-neighbour TCP packet channel (spec.md §5, "Neighbour I/O … are
/// ordinary event-driven sockets"). The wire framing and the socket itself
/// are out of scope; the core only needs to hand a built `Packet` to the
/// right established connection.
pub trait NeighbourLink: Send + Sync {
    fn send_packet(&self, neighbour: crate::types::NeighbourId, packet: Packet, reliable: bool);
}

/// A borrowed entry from the host cache. The core is the only writer of
/// `last_connect` / `last_query` / `last_ack` / `query_key` / `key_host` /
/// `key_time`, and only while holding the host cache lock (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct HostCacheEntry {
    pub endpoint: Endpoint,
    pub timestamp: SystemTime,
    pub last_connect: Option<SystemTime>,
    pub last_ack: Option<SystemTime>,
    pub last_query: Option<SystemTime>,
    pub query_key: Option<u32>,
    pub key_host: Option<Endpoint>,
    pub key_time: Option<SystemTime>,
    pub country: Option<CountryCode>,
}

impl HostCacheEntry {
    /// Mirrors `CHostCacheHost::canQuery`: a host that was queried or
    /// acknowledged too recently is skipped by the search engine even
    /// before the `searched` map is consulted.
    pub fn can_query(&self, now: SystemTime, throttle: std::time::Duration) -> bool {
        match self.last_query {
            Some(t) => now.duration_since(t).unwrap_or_default() >= throttle,
            None => true,
        }
    }
}

/// The persistent host cache (out of scope: its own persistence format and
/// eviction policy). The core consumes a timestamp-sorted read and a
/// country-aware `get_connectable`.
#[async_trait]
pub trait HostCache: Send + Sync {
    fn is_empty(&self) -> bool;
    fn size(&self) -> usize;
    /// Returns the most eligible connectable host, preferring one whose
    /// country matches `country_preference` when given.
    async fn get_connectable(
        &self,
        now: SystemTime,
        country_preference: Option<&str>,
    ) -> Option<HostCacheEntry>;
    /// Timestamp-descending snapshot, as `managed_search` walks it.
    async fn sorted_snapshot(&self) -> Vec<HostCacheEntry>;
    async fn mark_connect_attempt(&self, endpoint: Endpoint, at: SystemTime);
    async fn update_query_state(&self, endpoint: Endpoint, entry: HostCacheEntry);
    async fn save(&self);
}

/// GeoIP lookup (out of scope: the database itself).
pub trait GeoIp: Send + Sync {
    fn find_country(&self, endpoint: Endpoint) -> Option<CountryCode>;
}

/// The webcache (bootstrap HTTP) client. Requests are fire-and-forget
/// (spec.md §5).
#[async_trait]
pub trait Webcache: Send + Sync {
    fn request_random(&self);
    fn cancel_requests(&self);
    fn is_requesting(&self) -> bool;
}

/// The query hash table master (out of scope: the QHT compressor itself).
pub trait QueryHashMaster: Send + Sync {
    fn is_valid(&self) -> bool;
    fn build(&self);
}

/// Upcalls the core makes to its host: `neighbour_added/updated/removed`,
/// `search_state_changed`, `on_hit` (spec.md §7, "Propagation policy").
pub trait NetworkEventSink: Send + Sync {
    fn neighbour_added(&self, endpoint: Endpoint);
    fn neighbour_updated(&self, endpoint: Endpoint);
    fn neighbour_removed(&self, endpoint: Endpoint);
    fn search_state_changed(&self, guid: crate::types::Guid);
    fn on_hit(&self, guid: crate::types::Guid, hit_count: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn can_query_is_true_when_never_queried() {
        let entry = HostCacheEntry {
            endpoint: Endpoint::new(std::net::Ipv4Addr::new(1, 2, 3, 4), 6346),
            timestamp: SystemTime::now(),
            last_connect: None,
            last_ack: None,
            last_query: None,
            query_key: None,
            key_host: None,
            key_time: None,
            country: None,
        };
        assert!(entry.can_query(SystemTime::now(), Duration::from_secs(20)));
    }

    #[test]
    fn can_query_is_false_within_throttle_window() {
        let now = SystemTime::now();
        let entry = HostCacheEntry {
            endpoint: Endpoint::new(std::net::Ipv4Addr::new(1, 2, 3, 4), 6346),
            timestamp: now,
            last_connect: None,
            last_ack: None,
            last_query: Some(now),
            query_key: None,
            key_host: None,
            key_time: None,
            country: None,
        };
        assert!(!entry.can_query(now, Duration::from_secs(20)));
    }
}
