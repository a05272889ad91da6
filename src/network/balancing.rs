// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Hub balancing / role switcher (spec.md §4.7). Runs every 1800s, which
//! doubles as `MODE_CHANGE_WAIT`, the grace period since the last switch.
//!
//! spec.md §9 flags that the original `HubBalancing` only compares
//! `nLocalLoad > 50` once the denominator (our leaf capacity) is guaranteed
//! non-zero by the surrounding hub-count check; `evaluate` preserves that
//! ordering rather than guarding the division itself.

use crate::config::{DOWNGRADE_TIMEOUT_MINUTES, EMERGENCY_HUB_SWITCH_MINUTES, UPGRADE_TIMEOUT_MINUTES};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRole {
    Hub,
    Leaf,
}

/// Aggregated leaf-occupancy counts across our hub neighbours plus
/// ourselves, if we are a hub (spec.md GLOSSARY, "Cluster load").
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterLoad {
    pub cluster_leaves: u32,
    pub cluster_cap: u32,
    pub our_leaves: u32,
    pub our_cap: u32,
}

impl ClusterLoad {
    fn cluster_load_pct(&self) -> f64 {
        if self.cluster_cap == 0 {
            0.0
        } else {
            self.cluster_leaves as f64 * 100.0 / self.cluster_cap as f64
        }
    }

    fn local_load_pct(&self) -> f64 {
        if self.our_cap == 0 {
            0.0
        } else {
            self.our_leaves as f64 * 100.0 / self.our_cap as f64
        }
    }
}

#[derive(Debug)]
pub struct HubBalancer {
    minutes_below_50: u32,
    minutes_above_90: u32,
    minutes_trying: u32,
    last_mode_change: Instant,
}

impl HubBalancer {
    pub fn new(now: Instant) -> Self {
        Self {
            minutes_below_50: 0,
            minutes_above_90: 0,
            minutes_trying: 0,
            last_mode_change: now,
        }
    }

    /// One balancing pass. Returns the target role to switch to, if any.
    /// `mode_forced` short-circuits any role change (spec.md P4); the
    /// emergency-hub branch short-circuits everything else, matching the
    /// early `return` in the original `HubBalancing`.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        now: Instant,
        is_hub: bool,
        hubs_connected: u32,
        load: ClusterLoad,
        is_firewalled: bool,
        mode_forced: bool,
    ) -> Option<TargetRole> {
        info!("*** HUB BALANCING REPORT ***");

        if !is_hub && hubs_connected == 0 {
            self.minutes_trying += 1;
            if self.minutes_trying > EMERGENCY_HUB_SWITCH_MINUTES {
                info!(
                    minutes = EMERGENCY_HUB_SWITCH_MINUTES,
                    "no HUB connections for too long, emergency switch to HUB mode"
                );
                return Some(TargetRole::Hub);
            }
            return None;
        }
        self.minutes_trying = 0;

        let cluster_load = load.cluster_load_pct();
        if is_hub {
            info!(
                local_load_pct = load.local_load_pct(),
                leaves = load.our_leaves,
                capacity = load.our_cap,
                "local hub load"
            );
        }
        info!(
            cluster_load_pct = cluster_load,
            leaves = load.cluster_leaves,
            capacity = load.cluster_cap,
            "local hub cluster load"
        );

        if cluster_load < 50.0 {
            self.minutes_below_50 += 1;
            info!(minutes = self.minutes_below_50, "cluster loaded below 50% for N minutes");
        } else if cluster_load > 90.0 {
            self.minutes_above_90 += 1;
            info!(minutes = self.minutes_above_90, "cluster loaded above 90% for N minutes");
        } else {
            self.minutes_above_90 = 0;
            self.minutes_below_50 = 0;
        }

        if mode_forced {
            info!("not checking for mode change: client mode is forced");
            return None;
        }

        const MODE_CHANGE_WAIT: Duration = Duration::from_secs(1800);
        if now.saturating_duration_since(self.last_mode_change) < MODE_CHANGE_WAIT {
            info!("not checking for mode change: too early since last mode change");
            return None;
        }

        if is_hub && self.minutes_below_50 > DOWNGRADE_TIMEOUT_MINUTES {
            if hubs_connected > 0 {
                // load.our_cap is non-zero here: `is_hub` guarantees we advertised
                // a capacity, per the Open Question ordering note above.
                if load.local_load_pct() > 50.0 {
                    info!("cluster load too low for too long, staying HUB: above 50% of our capacity");
                    None
                } else {
                    info!("cluster load too low for too long, switching to LEAF");
                    Some(TargetRole::Leaf)
                }
            } else {
                info!("cluster load too low for too long, staying HUB: no HUB connections");
                None
            }
        } else if !is_hub && self.minutes_above_90 > UPGRADE_TIMEOUT_MINUTES {
            if !is_firewalled {
                info!("cluster load too high for too long, switching to HUB");
                Some(TargetRole::Hub)
            } else {
                None
            }
        } else {
            info!("no need for mode change");
            None
        }
    }

    /// Applied by the caller after it actually performs the switch (closes
    /// all neighbours, flips the role): resets the load counters and stamps
    /// `last_mode_change` (spec.md §4.7).
    pub fn record_mode_switch(&mut self, now: Instant) {
        self.minutes_below_50 = 0;
        self.minutes_above_90 = 0;
        self.minutes_trying = 0;
        self.last_mode_change = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(cluster_leaves: u32, cluster_cap: u32, our_leaves: u32, our_cap: u32) -> ClusterLoad {
        ClusterLoad {
            cluster_leaves,
            cluster_cap,
            our_leaves,
            our_cap,
        }
    }

    #[test]
    fn emergency_switch_after_ten_minutes_with_no_hubs() {
        let start = Instant::now();
        let mut balancer = HubBalancer::new(start);
        for _ in 0..10 {
            assert_eq!(
                balancer.evaluate(start, false, 0, ClusterLoad::default(), false, false),
                None
            );
        }
        assert_eq!(
            balancer.evaluate(start, false, 0, ClusterLoad::default(), false, false),
            Some(TargetRole::Hub)
        );
    }

    #[test]
    fn forced_mode_never_switches() {
        let start = Instant::now();
        let mut balancer = HubBalancer::new(start - Duration::from_secs(3600));
        let decision = balancer.evaluate(start, true, 1, load(10, 1000, 10, 1000), false, true);
        assert_eq!(decision, None);
    }

    #[test]
    fn too_early_since_last_switch_blocks_change() {
        let start = Instant::now();
        let mut balancer = HubBalancer::new(start);
        for _ in 0..61 {
            balancer.evaluate(start, true, 1, load(1, 1000, 1, 1000), false, false);
        }
        // last_mode_change is "now", so MODE_CHANGE_WAIT hasn't elapsed.
        let decision = balancer.evaluate(start, true, 1, load(1, 1000, 1, 1000), false, false);
        assert_eq!(decision, None);
    }

    #[test]
    fn hub_downgrades_to_leaf_when_sustained_low_load_and_own_load_below_50() {
        let start = Instant::now() - Duration::from_secs(3600);
        let mut balancer = HubBalancer::new(start);
        let now = start + Duration::from_secs(1900);
        for _ in 0..=DOWNGRADE_TIMEOUT_MINUTES {
            let _ = balancer.evaluate(now, true, 1, load(10, 1000, 10, 1000), false, false);
        }
        let decision = balancer.evaluate(now, true, 1, load(10, 1000, 10, 1000), false, false);
        assert_eq!(decision, Some(TargetRole::Leaf));
    }

    #[test]
    fn hub_stays_hub_when_own_load_at_or_above_50_despite_low_cluster_load() {
        let start = Instant::now() - Duration::from_secs(3600);
        let mut balancer = HubBalancer::new(start);
        let now = start + Duration::from_secs(1900);
        for _ in 0..=DOWNGRADE_TIMEOUT_MINUTES {
            let _ = balancer.evaluate(now, true, 1, load(10, 1000, 600, 1000), false, false);
        }
        let decision = balancer.evaluate(now, true, 1, load(10, 1000, 600, 1000), false, false);
        assert_eq!(decision, None);
    }

    #[test]
    fn leaf_upgrades_to_hub_when_sustained_high_load_and_not_firewalled() {
        let start = Instant::now() - Duration::from_secs(3600);
        let mut balancer = HubBalancer::new(start);
        let now = start + Duration::from_secs(1900);
        for _ in 0..=UPGRADE_TIMEOUT_MINUTES {
            let _ = balancer.evaluate(now, false, 1, load(950, 1000, 0, 0), false, false);
        }
        let decision = balancer.evaluate(now, false, 1, load(950, 1000, 0, 0), false, false);
        assert_eq!(decision, Some(TargetRole::Hub));
    }

    #[test]
    fn leaf_stays_leaf_when_firewalled_despite_sustained_high_load() {
        let start = Instant::now() - Duration::from_secs(3600);
        let mut balancer = HubBalancer::new(start);
        let now = start + Duration::from_secs(1900);
        for _ in 0..=UPGRADE_TIMEOUT_MINUTES {
            let _ = balancer.evaluate(now, false, 1, load(950, 1000, 0, 0), true, false);
        }
        let decision = balancer.evaluate(now, false, 1, load(950, 1000, 0, 0), true, false);
        assert_eq!(decision, None);
    }
}
