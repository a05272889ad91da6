// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The G2 network core (spec.md §2-§5): neighbour and routing state, the
//! per-peer and per-tick state machines, and the public `NetworkCore` handle.

pub mod adaptive;
pub mod balancing;
pub mod core;
pub mod neighbour;
pub mod rate;
pub mod router;
pub mod routing;
pub mod state;
pub mod tick;

pub use core::{IncomingConnection, NetworkCore, NetworkCoreBuilder};
pub use neighbour::Neighbour;
pub use routing::{RouteTarget, RoutingTable};
pub use state::CoreState;
pub use tick::Collaborators;
