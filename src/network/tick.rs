// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The 1 Hz Network Tick (spec.md §4.1): the ten-step maintenance sequence
//! run under the core mutex. Grounded on `network.cpp::OnSecondTimer`,
//! `::Maintain`, and `::DispatchKHL`; the try-lock-with-timeout wrapper that
//! calls into this module lives in `network/core.rs`.

use super::balancing::TargetRole;
use super::neighbour::TickOutcome;
use super::router::{route_packet, RouteDecision};
use super::state::CoreState;
use crate::config::NetworkCoreConfig;
use crate::interfaces::{
    DatagramTransport, GeoIp, HandshakeListener, HostCache, NeighbourLink, NetworkEventSink,
    QueryHashMaster, Webcache,
};
use crate::packet::{build_khl, PacketBuilder};
use crate::types::{Endpoint, Role};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, info};

/// Everything outside the core mutex that the tick needs to reach. Held by
/// `NetworkCore` and passed down by reference every tick (spec.md §6).
pub struct Collaborators {
    pub datagrams: Arc<dyn DatagramTransport>,
    pub handshakes: Arc<dyn HandshakeListener>,
    pub host_cache: Arc<dyn HostCache>,
    pub geoip: Arc<dyn GeoIp>,
    pub webcache: Arc<dyn Webcache>,
    pub query_hash_master: Arc<dyn QueryHashMaster>,
    pub events: Arc<dyn NetworkEventSink>,
    pub links: Arc<dyn NeighbourLink>,
}

/// Runs the full ten-step sequence. The caller already holds the core mutex
/// (acquired via try-lock, spec.md §5); this function performs bounded,
/// non-blocking work except for the collaborator calls it awaits, none of
/// which are allowed to block per their own contracts (fire-and-forget or
/// already-bounded).
pub async fn run(
    state: &mut CoreState,
    config: &NetworkCoreConfig,
    local_address: Endpoint,
    collabs: &Collaborators,
    now: Instant,
    now_wall: SystemTime,
) {
    // Step 1: webcache bootstrap.
    if state.hub_count() == 0 && !collabs.webcache.is_requesting() {
        let host_cache_exhausted = collabs.host_cache.is_empty()
            || collabs.host_cache.get_connectable(now_wall, None).await.is_none();
        if host_cache_exhausted {
            debug!("no hub connections and host cache exhausted, requesting webcache bootstrap");
            collabs.webcache.request_random();
        }
    }

    // Step 2: expire stale routes.
    if state.clean_routes_countdown > 0 {
        state.clean_routes_countdown -= 1;
    } else {
        state.routing.expire_old(now, crate::config::ROUTE_TTL);
        state.clean_routes_countdown = 60;
    }

    // Step 3: flush the datagram send queue.
    collabs.datagrams.flush_send_queue();

    // Step 4: adaptive hub evaluator.
    if state.role == Role::Hub && config.adaptive_hub {
        if state.adaptive_next_check > 0 {
            state.adaptive_next_check -= 1;
        } else {
            let leaf_rtts: Vec<_> = state.connected_leaves().map(|n| n.rtt).collect();
            if let Some(_reduced) = state.adaptive.run(&leaf_rtts, config.num_leafs, config) {
                // The reduced capacity is advertised on the next LNI; storage
                // of "current effective cap" belongs to the host application's
                // config layer, which owns `NetworkCoreConfig` (spec.md §6).
            }
            state.adaptive_next_check = config.adaptive_check_period;
        }
    }

    // Step 5: query hash table rebuild.
    if !collabs.query_hash_master.is_valid() {
        collabs.query_hash_master.build();
    }

    // Step 6: maintain().
    maintain(state, config, local_address, collabs, now, now_wall).await;

    // Step 7: hub balancing.
    if state.hub_balancing_countdown > 0 {
        state.hub_balancing_countdown -= 1;
    } else {
        state.hub_balancing_countdown = crate::config::HUB_BALANCING_INTERVAL.as_secs() as u32;
        run_hub_balancing(state, config, now, collabs).await;
    }

    // Step 8: tick the Search Manager.
    let local_endpoint = if collabs.datagrams.is_firewalled() { None } else { Some(local_address) };
    {
        let CoreState { searches, neighbours, .. } = state;
        searches
            .on_timer(
                now,
                now_wall,
                config,
                neighbours,
                local_endpoint,
                collabs.host_cache.as_ref(),
                collabs.datagrams.as_ref(),
                collabs.links.as_ref(),
            )
            .await;
    }

    // Step 9 and 10: LNI / KHL broadcasts.
    broadcast_lni_if_due(state, config, collabs);
    broadcast_khl_if_due(state, config, collabs, now_wall).await;
}

/// `maintain()` (spec.md §4.1): per-peer walk, role recount, population
/// control.
async fn maintain(
    state: &mut CoreState,
    config: &NetworkCoreConfig,
    local_address: Endpoint,
    collabs: &Collaborators,
    now: Instant,
    now_wall: SystemTime,
) {
    walk_neighbours(state, config, collabs, now);

    let (hubs, leaves, unknown, core_hubs, core_leaves) = count_roles(state);
    if state.hub_count() != hubs || state.leaf_count() != leaves {
        state.need_update_lni = true;
    }

    match state.role {
        Role::Leaf | Role::Unknown => {
            if hubs > config.num_hubs {
                let include_core = core_hubs as f64 / hubs.max(1) as f64 > 0.5;
                drop_youngest(state, Role::Hub, include_core, collabs);
            } else if hubs < config.num_hubs {
                let deficit = config.num_hubs - hubs;
                let attempt = (((deficit as f64) * config.connect_factor) as i64).min(8) - unknown as i64;
                connect_more(config, local_address, collabs, now_wall, attempt.max(0) as u32).await;
            }
        }
        Role::Hub => {
            if hubs > config.num_peers {
                let include_core = core_hubs as f64 / hubs.max(1) as f64 > 0.5;
                drop_youngest(state, Role::Hub, include_core, collabs);
            } else if hubs < config.num_peers {
                let deficit = config.num_peers - hubs;
                let attempt = (((deficit as f64) * config.connect_factor) as i64).min(8) - unknown as i64;
                connect_more(config, local_address, collabs, now_wall, attempt.max(0) as u32).await;
            }
            if leaves > config.num_leafs {
                let include_core = core_leaves as f64 / leaves.max(1) as f64 > 0.5;
                drop_youngest(state, Role::Leaf, include_core, collabs);
            }
        }
    }
}

/// Per-peer tick with reentrancy guard via `tick_cookie` (spec.md §9,
/// "cookie" idiom). New neighbours added mid-walk (e.g. by an incoming
/// connection racing the tick) carry the previous cookie and are skipped
/// until the next tick.
fn walk_neighbours(state: &mut CoreState, _config: &NetworkCoreConfig, collabs: &Collaborators, now: Instant) {
    let current_cookie = state.next_tick_cookie();
    let ids: Vec<_> = state.neighbours.keys().copied().collect();
    let mut to_close = Vec::new();

    for id in ids {
        let outcome = {
            let Some(neighbour) = state.neighbours.get_mut(&id) else { continue };
            if neighbour.tick_cookie == current_cookie {
                continue;
            }
            let outcome = neighbour.tick(
                now,
                crate::config::NEIGHBOUR_PING_PERIOD,
                crate::config::NEIGHBOUR_IDLE_READ_TIMEOUT,
            );
            neighbour.tick_cookie = current_cookie;
            outcome
        };
        match outcome {
            TickOutcome::SendPing => {
                let ping = PacketBuilder::new("PI").build();
                collabs.links.send_packet(id, ping, true);
                if let Some(n) = state.neighbours.get_mut(&id) {
                    n.record_ping_sent(now);
                }
            }
            TickOutcome::Close => to_close.push(id),
            TickOutcome::Continue => {}
        }
    }

    for id in to_close {
        if let Some(neighbour) = state.remove_neighbour(id) {
            collabs.events.neighbour_removed(neighbour.endpoint);
        }
    }
}

fn count_roles(state: &CoreState) -> (u32, u32, u32, u32, u32) {
    let mut hubs = 0u32;
    let mut leaves = 0u32;
    let mut unknown = 0u32;
    let mut core_hubs = 0u32;
    let mut core_leaves = 0u32;
    for n in state.neighbours.values() {
        if n.is_connected() {
            match n.role {
                Role::Unknown => unknown += 1,
                Role::Hub => {
                    hubs += 1;
                    if n.is_core_impl {
                        core_hubs += 1;
                    }
                }
                Role::Leaf => {
                    leaves += 1;
                    if n.is_core_impl {
                        core_leaves += 1;
                    }
                }
            }
        } else {
            unknown += 1;
        }
    }
    (hubs, leaves, unknown, core_hubs, core_leaves)
}

/// Drops the most-recently-connected neighbour of `role`, optionally
/// excluding peers that are not "core impl" when `include_core` is false
/// (spec.md §4.1, "ties broken by `connected_at` maximum").
fn drop_youngest(state: &mut CoreState, role: Role, include_core: bool, collabs: &Collaborators) {
    let youngest = state
        .neighbours
        .values()
        .filter(|n| n.role == role && n.is_connected())
        .filter(|n| include_core || !n.is_core_impl)
        .max_by_key(|n| n.connected_at);

    if let Some(id) = youngest.map(|n| n.id) {
        if let Some(neighbour) = state.remove_neighbour(id) {
            info!(endpoint = %neighbour.endpoint, ?role, "dropping youngest neighbour to respect fleet composition");
            collabs.events.neighbour_removed(neighbour.endpoint);
        }
    }
}

/// Pulls `attempt` hosts from the host cache and dials them, preferring
/// country-matched hosts: iterate configured preferred countries first,
/// then the GeoIP of our own address, then "any" (spec.md §4.1, "maintain()";
/// SPEC_FULL.md §2 on the iterate-then-fallback loop mechanics).
async fn connect_more(
    config: &NetworkCoreConfig,
    local_address: Endpoint,
    collabs: &Collaborators,
    now_wall: SystemTime,
    attempt: u32,
) {
    if attempt == 0 {
        return;
    }

    let mut country_index = 0usize;
    let mut use_country_preference = !config.preferred_countries.is_empty();
    let fallback_country = collabs.geoip.find_country(local_address);
    let mut remaining = attempt;

    while remaining > 0 {
        let preference = if use_country_preference {
            config.preferred_countries.get(country_index).map(|s| s.as_str())
        } else {
            None
        }
        .or(fallback_country.as_deref());

        match collabs.host_cache.get_connectable(now_wall, preference).await {
            Some(host) => {
                collabs.handshakes.connect_to(host.endpoint).await;
                collabs.host_cache.mark_connect_attempt(host.endpoint, now_wall).await;
                remaining -= 1;
            }
            None => {
                if use_country_preference {
                    country_index += 1;
                    if country_index >= config.preferred_countries.len() {
                        use_country_preference = false;
                    }
                    // Retrying the same attempt with the next country/fallback
                    // does not burn an attempt (SPEC_FULL.md §2).
                    continue;
                }
                break;
            }
        }
    }
}

async fn run_hub_balancing(state: &mut CoreState, config: &NetworkCoreConfig, now: Instant, collabs: &Collaborators) {
    let our_cap = config.num_leafs;
    let load = state.cluster_load(our_cap);
    let hubs_connected = state.hub_count();
    let is_firewalled = collabs.datagrams.is_firewalled();
    let mode_forced = config.client_mode.is_forced();

    let decision = state.balancer.evaluate(now, state.role == Role::Hub, hubs_connected, load, is_firewalled, mode_forced);

    if let Some(target) = decision {
        let new_role = match target {
            TargetRole::Hub => Role::Hub,
            TargetRole::Leaf => Role::Leaf,
        };
        if new_role != state.role {
            info!(from = ?state.role, to = ?new_role, "switching role");
            let ids: Vec<_> = state.neighbours.keys().copied().collect();
            for id in ids {
                if let Some(n) = state.remove_neighbour(id) {
                    collabs.events.neighbour_removed(n.endpoint);
                }
            }
            state.role = new_role;
            state.balancer.record_mode_switch(now);
        }
    }
}

fn broadcast_lni_if_due(state: &mut CoreState, config: &NetworkCoreConfig, collabs: &Collaborators) {
    if state.lni_wait > 0 {
        state.lni_wait -= 1;
        return;
    }
    if state.need_update_lni {
        state.lni_wait = config.lni_minimum_update.as_secs() as u32;
        state.need_update_lni = false;
        for (id, neighbour) in state.neighbours.iter() {
            if neighbour.is_connected() {
                let lni = PacketBuilder::new("LNI").build();
                collabs.links.send_packet(*id, lni, true);
            }
        }
    }
}

async fn broadcast_khl_if_due(state: &mut CoreState, config: &NetworkCoreConfig, collabs: &Collaborators, now_wall: SystemTime) {
    if state.khl_wait > 0 {
        state.khl_wait -= 1;
        return;
    }
    collabs.host_cache.save().await;
    dispatch_khl(state, config, collabs, now_wall).await;
    state.khl_wait = config.khl_period.as_secs() as u32;
}

async fn dispatch_khl(state: &CoreState, config: &NetworkCoreConfig, collabs: &Collaborators, now_wall: SystemTime) {
    if state.neighbours.is_empty() {
        return;
    }

    let now_unix = now_wall
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    let hub_endpoints: Vec<Endpoint> = state
        .neighbours
        .values()
        .filter(|n| n.role == Role::Hub && n.is_connected())
        .map(|n| n.endpoint)
        .collect();

    let cached: Vec<(Endpoint, u32)> = collabs
        .host_cache
        .sorted_snapshot()
        .await
        .into_iter()
        .take(config.khl_hub_count)
        .map(|h| {
            let ts = h
                .timestamp
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0);
            (h.endpoint, ts)
        })
        .collect();

    let khl = build_khl(now_unix, &hub_endpoints, &cached);

    for (id, neighbour) in state.neighbours.iter() {
        if neighbour.is_connected() {
            collabs.links.send_packet(*id, khl.clone(), false);
        }
    }
}

/// Looks up a routing table entry and forwards unconditionally (spec.md
/// §4.2, `route_packet`). Exposed for `network/core.rs`'s public
/// `route_packet` contract method.
pub fn forward(state: &CoreState, target_guid: &crate::types::Guid, packet: crate::packet::Packet, collabs: &Collaborators) {
    match route_packet(&state.routing, target_guid) {
        RouteDecision::ForwardTcp(id) => collabs.links.send_packet(id, packet, true),
        RouteDecision::ForwardUdp(ep) => {
            let datagrams = collabs.datagrams.clone();
            let packet = packet.clone();
            tokio::spawn(async move {
                datagrams.send_packet(ep, packet, true).await;
            });
        }
        RouteDecision::Drop | RouteDecision::NotRouted => {
            debug!(%target_guid, "no route for packet, dropping");
        }
    }
}
