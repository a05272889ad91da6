// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! A minimal stand-in for the external G2 packet codec (spec.md §6,
//! "out of scope: the on-wire G2 packet codec"). The core only needs to
//! *build* the handful of packet types it originates itself (KHL, QKR) and
//! to *inspect* a packet's type and destination GUID; the wire format and
//! the rest of the G2 vocabulary are the encoder's problem, not ours.
//!
//! `AddRef`/`Release` from the original C++ map directly onto `Arc` clone
//! and drop, so `Packet` is a cheap-to-clone handle rather than something we
//! manually refcount.

use crate::types::{Endpoint, Guid};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Child {
    kind: [u8; 2],
    payload: Vec<u8>,
}

#[derive(Debug)]
struct PacketInner {
    kind: [u8; 3],
    children: Vec<Child>,
    to: Option<Guid>,
}

/// A reference-counted, immutable-once-built G2 packet.
#[derive(Debug, Clone)]
pub struct Packet(Arc<PacketInner>);

/// Builder for a packet under construction; mirrors `new_packet` /
/// `write_child` / `write_int_le` / `write_host_address` from spec.md §6.
pub struct PacketBuilder {
    kind: [u8; 3],
    children: Vec<Child>,
    to: Option<Guid>,
}

impl PacketBuilder {
    pub fn new(kind: &str) -> Self {
        let mut k = [0u8; 3];
        for (slot, b) in k.iter_mut().zip(kind.bytes()) {
            *slot = b;
        }
        Self {
            kind: k,
            children: Vec::new(),
            to: None,
        }
    }

    /// Sets the routing destination GUID carried by this packet (the `TO`
    /// section in G2 terms); `route_packet_through` reads it back via
    /// `get_to`.
    pub fn with_destination(mut self, guid: Guid) -> Self {
        self.to = Some(guid);
        self
    }

    pub fn write_child(mut self, kind: &str, payload: Vec<u8>) -> Self {
        let mut k = [0u8; 2];
        for (slot, b) in k.iter_mut().zip(kind.bytes()) {
            *slot = b;
        }
        self.children.push(Child { kind: k, payload });
        self
    }

    pub fn write_int_le_child(self, kind: &str, value: u32) -> Self {
        self.write_child(kind, value.to_le_bytes().to_vec())
    }

    pub fn write_host_address_child(self, kind: &str, endpoint: Endpoint) -> Self {
        let mut payload = Vec::with_capacity(6);
        payload.extend_from_slice(&endpoint.ip.octets());
        payload.extend_from_slice(&endpoint.port.to_le_bytes());
        self.write_child(kind, payload)
    }

    pub fn build(self) -> Packet {
        Packet(Arc::new(PacketInner {
            kind: self.kind,
            children: self.children,
            to: self.to,
        }))
    }
}

impl Packet {
    pub fn get_type(&self) -> String {
        String::from_utf8_lossy(&self.0.kind)
            .trim_end_matches('\0')
            .to_string()
    }

    /// Extracts the routing destination, if any (the `get_to` contract from
    /// spec.md §6).
    pub fn get_to(&self) -> Option<Guid> {
        self.0.to
    }

    pub fn child_count(&self) -> usize {
        self.0.children.len()
    }

    /// Strong-reference count, exposed only so tests can assert the
    /// `AddRef`/`Release` discipline (spec.md §5, "resource ownership")
    /// holds: every outstanding send holds one clone, and the count drops
    /// back to one once the transport is done with it.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// Builds a `KHL` (Known Hub List) packet: a timestamp child, one `NH`
/// (neighbour hub) entry per connected hub endpoint, and up to
/// `khl_hub_count` `CH` (cached hub) entries from the host cache, each
/// carrying its own timestamp (spec.md §4.1, "KHL broadcast").
pub fn build_khl(now_unix: u32, neighbour_hubs: &[Endpoint], cached_hubs: &[(Endpoint, u32)]) -> Packet {
    let mut builder = PacketBuilder::new("KHL").write_int_le_child("TS", now_unix);
    for ep in neighbour_hubs {
        builder = builder.write_host_address_child("NH", *ep);
    }
    for (ep, ts) in cached_hubs {
        builder = builder
            .write_host_address_child("CH", *ep)
            .write_int_le_child("CH", *ts);
    }
    builder.build()
}

/// Builds a Query Key Request, optionally carrying a `QNA` (query-key-for
/// another host) section and a `REF` (refresh) marker, per spec.md §4.5
/// step 2.
pub fn build_qkr(return_address: Endpoint, relayed_target: Option<Endpoint>, refresh: bool) -> Packet {
    let mut builder = PacketBuilder::new("QKR").write_host_address_child("RNA", return_address);
    if let Some(target) = relayed_target {
        builder = builder.write_host_address_child("QNA", target);
        if refresh {
            builder = builder.write_child("REF", Vec::new());
        }
    }
    builder.build()
}
