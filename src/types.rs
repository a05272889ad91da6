// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Small value types shared across the network core.

use std::fmt;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Routing key for a packet or a managed search. G2 uses a 128-bit GUID for
/// both purposes; we reuse the same newtype for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub Uuid);

impl Guid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An IPv4 endpoint: address plus port. Equality is by both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// ISO-3166 two-letter country code, as returned by the GeoIP collaborator.
/// "ZZ" is the conventional "unknown/any" code used by the fallback path in
/// `maintain()`.
pub type CountryCode = String;

pub const ANY_COUNTRY: &str = "ZZ";

/// The two roles a connected G2 node can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Unknown,
    Hub,
    Leaf,
}

/// Our own node's operating mode. `Auto` means the role switcher (§4.7) is
/// free to move us between Hub and Leaf; `Leaf`/`Hub` pin the mode, per the
/// `ClientMode` configuration knob in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientMode {
    Auto,
    Leaf,
    Hub,
}

impl ClientMode {
    pub fn is_forced(self) -> bool {
        !matches!(self, ClientMode::Auto)
    }
}

/// Lifecycle state of a neighbour connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NeighbourState {
    Connecting,
    Handshaking,
    Connected,
    Closing,
}

/// Opaque identifier for a neighbour, stable for the lifetime of the
/// connection. The routing table stores this instead of a pointer/reference,
/// and validates liveness against the neighbour set on every lookup (see
/// DESIGN.md, "cyclic references").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NeighbourId(pub u64);
