// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The network core of a Gnutella2 (G2) peer-to-peer node: neighbour
//! management, packet routing, query-key acquisition, and the managed
//! search engine, generic over the external collaborators listed in
//! `interfaces`.

pub mod config;
pub mod error;
pub mod interfaces;
pub mod network;
pub mod packet;
pub mod search;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::NetworkCoreConfig;
pub use error::{CoreError, Result};
pub use network::{IncomingConnection, NetworkCore, NetworkCoreBuilder};
pub use packet::{Packet, PacketBuilder};
pub use search::{HitIngestOutcome, ManagedSearch, SearchManager, SearchState};
pub use types::{ClientMode, Endpoint, Guid, NeighbourId, NeighbourState, Role};
