// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! `NetworkCore`: the public contract (spec.md §4.1, `connect`, `disconnect`,
//! `is_listening`, `is_firewalled`, `connect_to`, `disconnect_from`,
//! `route_packet`, `route_packet_through`, `on_incoming_connection`,
//! `find_neighbour`), plus the try-lock discipline (spec.md §5) that guards
//! every access to `CoreState`.

use super::neighbour::Neighbour;
use super::router::{route_packet_through as decide_route_through, RouteDecision, Source};
use super::state::CoreState;
use super::tick::{self, Collaborators};
use crate::config::{NetworkCoreConfig, ACCEPT_TRY_LOCK, TICK_TRY_LOCK};
use crate::error::{CoreError, Result};
use crate::interfaces::{
    DatagramTransport, GeoIp, HandshakeListener, HostCache, NeighbourLink, NetworkEventSink,
    QueryHashMaster, Webcache,
};
use crate::packet::Packet;
use crate::types::{Endpoint, Guid, NeighbourId, NeighbourState, Role};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// A newly accepted but not-yet-handshaken TCP connection, handed to
/// `on_incoming_connection` by the `HandshakeListener`'s upcall.
pub struct IncomingConnection {
    pub endpoint: Endpoint,
}

/// One G2 network core instance. The process owns exactly one (spec.md §9,
/// "global mutable singleton" recast as an explicit handle).
pub struct NetworkCore {
    config: NetworkCoreConfig,
    local_address: Endpoint,
    state: Mutex<CoreState>,
    collabs: Collaborators,
    active: AtomicBool,
}

#[allow(clippy::too_many_arguments)]
pub struct NetworkCoreBuilder {
    pub config: NetworkCoreConfig,
    pub local_address: Endpoint,
    pub datagrams: Arc<dyn DatagramTransport>,
    pub handshakes: Arc<dyn HandshakeListener>,
    pub host_cache: Arc<dyn HostCache>,
    pub geoip: Arc<dyn GeoIp>,
    pub webcache: Arc<dyn Webcache>,
    pub query_hash_master: Arc<dyn QueryHashMaster>,
    pub events: Arc<dyn NetworkEventSink>,
    pub links: Arc<dyn NeighbourLink>,
}

impl NetworkCoreBuilder {
    pub fn build(self, now: Instant) -> NetworkCore {
        NetworkCore {
            config: self.config,
            local_address: self.local_address,
            state: Mutex::new(CoreState::new(now)),
            collabs: Collaborators {
                datagrams: self.datagrams,
                handshakes: self.handshakes,
                host_cache: self.host_cache,
                geoip: self.geoip,
                webcache: self.webcache,
                query_hash_master: self.query_hash_master,
                events: self.events,
                links: self.links,
            },
            active: AtomicBool::new(false),
        }
    }
}

impl NetworkCore {
    /// Starts the listeners. Failure is local-fatal and leaves `active =
    /// false` (spec.md §7).
    pub async fn connect(&self) -> Result<()> {
        self.collabs.datagrams.listen().await?;
        self.collabs.handshakes.listen().await?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Tears everything down synchronously under the core mutex (spec.md §5,
    /// "Cancellation"): stops listeners, closes every neighbour, clears
    /// routing, drains the search registry.
    pub async fn disconnect(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.collabs.webcache.cancel_requests();
        self.collabs.datagrams.disconnect().await;
        self.collabs.handshakes.disconnect().await;

        let mut state = self.state.lock().await;
        state.clear_neighbours();
        state.routing.clear();
    }

    pub fn is_listening(&self) -> bool {
        self.active.load(Ordering::SeqCst)
            && self.collabs.datagrams.is_listening()
            && self.collabs.handshakes.is_listening()
    }

    pub fn is_firewalled(&self) -> bool {
        self.collabs.datagrams.is_firewalled() || self.collabs.handshakes.is_firewalled()
    }

    /// Dials an outbound connection outside the tick's own `maintain()` loop
    /// (spec.md §4.1 contract).
    pub async fn connect_to(&self, endpoint: Endpoint) {
        self.collabs.handshakes.connect_to(endpoint).await;
    }

    pub async fn disconnect_from(&self, endpoint: Endpoint) -> bool {
        let mut state = self.state.lock().await;
        let id = state.find_by_endpoint(endpoint.ip).map(|n| n.id);
        match id {
            Some(id) => {
                if let Some(neighbour) = state.remove_neighbour(id) {
                    self.collabs.events.neighbour_removed(neighbour.endpoint);
                }
                true
            }
            None => false,
        }
    }

    pub fn find_neighbour(&self, ip: Ipv4Addr) -> Option<Endpoint> {
        self.state.try_lock().ok().and_then(|state| state.find_by_endpoint(ip).map(|n| n.endpoint))
    }

    /// `route_packet(target_guid, packet)` (spec.md §4.2): unconditional
    /// forward. Returns `false` when nothing is bound for `target_guid`.
    pub async fn route_packet(&self, target_guid: Guid, packet: Packet) -> bool {
        let state = self.state.lock().await;
        match super::router::route_packet(&state.routing, &target_guid) {
            RouteDecision::ForwardTcp(id) => {
                self.collabs.links.send_packet(id, packet, true);
                true
            }
            RouteDecision::ForwardUdp(ep) => {
                self.collabs.datagrams.send_packet(ep, packet, true).await;
                true
            }
            RouteDecision::Drop | RouteDecision::NotRouted => false,
        }
    }

    /// `route_packet_through(packet, from_neighbour?)` (spec.md §4.2):
    /// applies the trust matrix (P3 in spec.md §8).
    pub async fn route_packet_through(&self, destination: Option<Guid>, packet: Packet, from: Option<NeighbourId>) -> bool {
        let state = self.state.lock().await;
        let source = match from.and_then(|id| state.neighbours.get(&id)) {
            Some(n) => Source::Neighbour(n.role),
            None => Source::Udp,
        };

        let decision = decide_route_through(&state.routing, destination, state.local_guid, source, |id| {
            state.neighbours.get(&id).map(|n| n.role)
        });

        match decision {
            RouteDecision::ForwardTcp(id) => {
                self.collabs.links.send_packet(id, packet, true);
                true
            }
            RouteDecision::ForwardUdp(ep) => {
                self.collabs.datagrams.send_packet(ep, packet, true).await;
                true
            }
            RouteDecision::Drop => true,
            RouteDecision::NotRouted => false,
        }
    }

    /// Admits an inbound connection under the short 50 ms try-lock (spec.md
    /// §5, "admission-control backpressure"). Rejects on contention.
    pub async fn on_incoming_connection(&self, conn: IncomingConnection, now: Instant) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        match timeout(ACCEPT_TRY_LOCK, self.state.lock()).await {
            Ok(mut state) => {
                let id = state.allocate_neighbour_id();
                let neighbour = Neighbour::new(id, conn.endpoint, now);
                state.insert_neighbour(neighbour);
                self.collabs.events.neighbour_added(conn.endpoint);
                true
            }
            Err(_) => {
                warn!(endpoint = %conn.endpoint, "core mutex busy, rejecting incoming connection");
                false
            }
        }
    }

    /// Runs one Network Tick (spec.md §4.1). Returns `Err(TryLockTimeout)`
    /// when the 150 ms try-lock fails, so the caller can log and retry on
    /// its own schedule rather than stalling the I/O thread.
    pub async fn run_tick(&self, now: Instant, now_wall: SystemTime) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(CoreError::NotActive);
        }
        match timeout(TICK_TRY_LOCK, self.state.lock()).await {
            Ok(mut state) => {
                tick::run(&mut state, &self.config, self.local_address, &self.collabs, now, now_wall).await;
                Ok(())
            }
            Err(_) => {
                debug!("network core overloaded, skipping this tick");
                Err(CoreError::TryLockTimeout(TICK_TRY_LOCK))
            }
        }
    }

    pub async fn role(&self) -> Role {
        self.state.lock().await.role
    }

    pub async fn neighbour_state(&self, ip: Ipv4Addr) -> Option<NeighbourState> {
        self.state.lock().await.find_by_endpoint(ip).map(|n| n.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::HostCacheEntry;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::Mutex as StdMutex;

    struct NullDatagrams;
    #[async_trait]
    impl DatagramTransport for NullDatagrams {
        async fn listen(&self) -> std::io::Result<()> {
            Ok(())
        }
        async fn disconnect(&self) {}
        fn is_listening(&self) -> bool {
            true
        }
        fn is_firewalled(&self) -> bool {
            false
        }
        async fn send_packet(&self, _to: Endpoint, _packet: Packet, _acked: bool) {}
        fn flush_send_queue(&self) {}
    }

    struct NullHandshakes;
    #[async_trait]
    impl HandshakeListener for NullHandshakes {
        async fn listen(&self) -> std::io::Result<()> {
            Ok(())
        }
        async fn disconnect(&self) {}
        fn is_listening(&self) -> bool {
            true
        }
        fn is_firewalled(&self) -> bool {
            false
        }
        async fn connect_to(&self, _endpoint: Endpoint) {}
    }

    struct NullHostCache;
    #[async_trait]
    impl HostCache for NullHostCache {
        fn is_empty(&self) -> bool {
            true
        }
        fn size(&self) -> usize {
            0
        }
        async fn get_connectable(&self, _now: SystemTime, _country_preference: Option<&str>) -> Option<HostCacheEntry> {
            None
        }
        async fn sorted_snapshot(&self) -> Vec<HostCacheEntry> {
            Vec::new()
        }
        async fn mark_connect_attempt(&self, _endpoint: Endpoint, _at: SystemTime) {}
        async fn update_query_state(&self, _endpoint: Endpoint, _entry: HostCacheEntry) {}
        async fn save(&self) {}
    }

    struct NullGeoIp;
    impl GeoIp for NullGeoIp {
        fn find_country(&self, _endpoint: Endpoint) -> Option<crate::types::CountryCode> {
            None
        }
    }

    struct NullWebcache;
    impl Webcache for NullWebcache {
        fn request_random(&self) {}
        fn cancel_requests(&self) {}
        fn is_requesting(&self) -> bool {
            false
        }
    }

    struct NullQht;
    impl QueryHashMaster for NullQht {
        fn is_valid(&self) -> bool {
            true
        }
        fn build(&self) {}
    }

    #[derive(Default)]
    struct RecordingSink {
        added: StdMutex<Vec<Endpoint>>,
    }
    impl NetworkEventSink for RecordingSink {
        fn neighbour_added(&self, endpoint: Endpoint) {
            self.added.lock().unwrap().push(endpoint);
        }
        fn neighbour_updated(&self, _endpoint: Endpoint) {}
        fn neighbour_removed(&self, _endpoint: Endpoint) {}
        fn search_state_changed(&self, _guid: Guid) {}
        fn on_hit(&self, _guid: Guid, _hit_count: u32) {}
    }

    struct NullLinks;
    impl NeighbourLink for NullLinks {
        fn send_packet(&self, _neighbour: NeighbourId, _packet: Packet, _reliable: bool) {}
    }

    fn core(now: Instant, sink: Arc<RecordingSink>) -> NetworkCore {
        NetworkCoreBuilder {
            config: NetworkCoreConfig::default(),
            local_address: Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 6346),
            datagrams: Arc::new(NullDatagrams),
            handshakes: Arc::new(NullHandshakes),
            host_cache: Arc::new(NullHostCache),
            geoip: Arc::new(NullGeoIp),
            webcache: Arc::new(NullWebcache),
            query_hash_master: Arc::new(NullQht),
            events: sink,
            links: Arc::new(NullLinks),
        }
        .build(now)
    }

    #[tokio::test]
    async fn connect_marks_the_core_active_and_listening() {
        let now = Instant::now();
        let sink = Arc::new(RecordingSink::default());
        let c = core(now, sink);
        assert!(!c.is_listening());
        c.connect().await.unwrap();
        assert!(c.is_listening());
    }

    #[tokio::test]
    async fn incoming_connection_is_rejected_while_inactive() {
        let now = Instant::now();
        let sink = Arc::new(RecordingSink::default());
        let c = core(now, sink);
        let accepted = c
            .on_incoming_connection(
                IncomingConnection { endpoint: Endpoint::new(Ipv4Addr::new(1, 2, 3, 4), 6346) },
                now,
            )
            .await;
        assert!(!accepted);
    }

    #[tokio::test]
    async fn incoming_connection_registers_a_neighbour_once_active() {
        let now = Instant::now();
        let sink = Arc::new(RecordingSink::default());
        let c = core(now, sink.clone());
        c.connect().await.unwrap();
        let ep = Endpoint::new(Ipv4Addr::new(1, 2, 3, 4), 6346);
        let accepted = c.on_incoming_connection(IncomingConnection { endpoint: ep }, now).await;
        assert!(accepted);
        assert_eq!(sink.added.lock().unwrap().as_slice(), &[ep]);
        assert_eq!(c.find_neighbour(ep.ip), Some(ep));
    }

    #[tokio::test]
    async fn disconnect_clears_all_neighbours() {
        let now = Instant::now();
        let sink = Arc::new(RecordingSink::default());
        let c = core(now, sink);
        c.connect().await.unwrap();
        let ep = Endpoint::new(Ipv4Addr::new(1, 2, 3, 4), 6346);
        c.on_incoming_connection(IncomingConnection { endpoint: ep }, now).await;
        c.disconnect().await;
        assert_eq!(c.find_neighbour(ep.ip), None);
        assert!(!c.is_listening());
    }

    #[tokio::test]
    async fn tick_runs_cleanly_against_an_empty_core() {
        let now = Instant::now();
        let sink = Arc::new(RecordingSink::default());
        let c = core(now, sink);
        c.connect().await.unwrap();
        let result = c.run_tick(now, SystemTime::now()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn route_packet_drops_when_nothing_is_bound() {
        let now = Instant::now();
        let sink = Arc::new(RecordingSink::default());
        let c = core(now, sink);
        let routed = c.route_packet(Guid::new(), crate::packet::PacketBuilder::new("Q2").build()).await;
        assert!(!routed);
    }
}
