// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The Rate Controller (spec.md §4.3): a byte-budgeted scheduler over a set
//! of registered sockets. Grounded on the same `HashMap`-of-state-plus-
//! `retain`-based-cleanup idiom the teacher uses in
//! `sn_networking/src/relay_manager.rs` and `sn_networking/src/metrics/bad_node.rs`.

use crate::types::NeighbourId;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
struct SocketDemand {
    requested_bytes: u64,
    is_core_impl: bool,
}

/// Distributes byte credits to registered sockets proportionally to demand,
/// on a cadence of ≥10 Hz (spec.md §4.3). Credits never carry over: each
/// call to `distribute` computes a fresh allotment for exactly one period.
#[derive(Debug, Default)]
pub struct RateController {
    upload_limit_bps: u64,
    download_limit_bps: u64,
    sockets: HashMap<NeighbourId, SocketDemand>,
}

impl RateController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_upload_limit(&mut self, bps: u64) {
        self.upload_limit_bps = bps;
    }

    pub fn set_download_limit(&mut self, bps: u64) {
        self.download_limit_bps = bps;
    }

    pub fn add_socket(&mut self, socket: NeighbourId, is_core_impl: bool) {
        self.sockets.insert(
            socket,
            SocketDemand {
                requested_bytes: 0,
                is_core_impl,
            },
        );
    }

    pub fn remove_socket(&mut self, socket: NeighbourId) {
        self.sockets.remove(&socket);
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Records how many bytes a socket would like to send this period; the
    /// next `distribute` call allots credit proportionally to this demand.
    pub fn record_demand(&mut self, socket: NeighbourId, requested_bytes: u64) {
        if let Some(state) = self.sockets.get_mut(&socket) {
            state.requested_bytes = requested_bytes;
        }
    }

    /// Computes one period's worth of upload credit per socket,
    /// proportional to demand. `is_core_impl` sockets are *not*
    /// prioritised, demand is the only weight (spec.md §4.3).
    pub fn distribute(&mut self, period: Duration) -> HashMap<NeighbourId, u64> {
        let budget = (self.upload_limit_bps as f64 * period.as_secs_f64()) as u64;
        let total_demand: u64 = self.sockets.values().map(|s| s.requested_bytes).sum();

        let mut credits = HashMap::with_capacity(self.sockets.len());
        if total_demand == 0 || budget == 0 {
            for id in self.sockets.keys() {
                credits.insert(*id, 0);
            }
            return credits;
        }

        for (id, state) in &self.sockets {
            let share = (budget as u128 * state.requested_bytes as u128 / total_demand as u128) as u64;
            credits.insert(*id, share);
        }

        debug!(sockets = self.sockets.len(), budget, "distributed rate credits");
        // Demand is consumed by the distribution; a socket must re-record
        // its demand for the next period, which is what prevents credit
        // from accumulating across ticks.
        for state in self.sockets.values_mut() {
            state.requested_bytes = 0;
        }
        credits
    }
}
