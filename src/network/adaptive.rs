// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The adaptive hub evaluator (spec.md §4.6). Runs only in Hub mode, only
//! when `adaptive_hub` is enabled, on the `AdaptiveCheckPeriod` cadence
//! driven by the tick (spec.md §4.1 step 4).
//!
//! spec.md §9 flags that the original `AdaptiveHubRun` computed
//! `nCoreLeaves / nLeaves` as an integer ratio, which is zero for nearly
//! every realistic fleet and clearly isn't the intent (a percentage
//! threshold comparison). This implementation uses floating-point ratios
//! throughout, closing that bug rather than reproducing it (DESIGN.md,
//! Open Question resolution).

use crate::config::NetworkCoreConfig;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default)]
pub struct AdaptiveHubEvaluator {
    busy_periods: u32,
    total_periods: u32,
}

impl AdaptiveHubEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// One evaluation period. `leaf_rtts` are the RTTs of every CONNECTED
    /// leaf neighbour. Returns the new `num_leafs` cap if this window just
    /// completed and the busy share exceeded the threshold (P5 in
    /// spec.md §8).
    pub fn run(
        &mut self,
        leaf_rtts: &[Duration],
        current_num_leafs: u32,
        config: &NetworkCoreConfig,
    ) -> Option<u32> {
        if leaf_rtts.is_empty() {
            return None;
        }

        let busy = leaf_rtts
            .iter()
            .filter(|rtt| **rtt >= config.adaptive_max_ping)
            .count();
        let busy_share = busy as f64 / leaf_rtts.len() as f64 * 100.0;

        if busy_share > config.adaptive_busy_percentage as f64 {
            self.busy_periods += 1;
        }
        self.total_periods += 1;

        if self.total_periods < config.adaptive_time_window {
            return None;
        }

        let window_busy_share = self.busy_periods as f64 / self.total_periods as f64 * 100.0;
        let result = if window_busy_share > config.adaptive_busy_percentage as f64 {
            let reduced = (leaf_rtts.len() as u32 / 2).max(config.adaptive_minimum_leaves);
            info!(
                from = current_num_leafs,
                to = reduced,
                busy_periods = self.busy_periods,
                total_periods = self.total_periods,
                "adaptive hub reducing leaf capacity"
            );
            Some(reduced)
        } else {
            None
        };

        self.busy_periods = 0;
        self.total_periods = 0;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_ping_ms: u64, busy_pct: u32, window: u32, min_leaves: u32) -> NetworkCoreConfig {
        let mut cfg = NetworkCoreConfig::default();
        cfg.adaptive_max_ping = Duration::from_millis(max_ping_ms);
        cfg.adaptive_busy_percentage = busy_pct;
        cfg.adaptive_time_window = window;
        cfg.adaptive_minimum_leaves = min_leaves;
        cfg
    }

    #[test]
    fn no_leaves_yields_no_decision() {
        let mut evaluator = AdaptiveHubEvaluator::new();
        let cfg = config(1500, 50, 3, 1);
        assert_eq!(evaluator.run(&[], 10, &cfg), None);
    }

    #[test]
    fn below_threshold_never_trips_even_across_full_window() {
        let mut evaluator = AdaptiveHubEvaluator::new();
        let cfg = config(1500, 50, 2, 1);
        let rtts = vec![Duration::from_millis(10), Duration::from_millis(10)];
        assert_eq!(evaluator.run(&rtts, 10, &cfg), None);
        assert_eq!(evaluator.run(&rtts, 10, &cfg), None);
    }

    #[test]
    fn sustained_busy_share_above_threshold_halves_capacity_p5() {
        let mut evaluator = AdaptiveHubEvaluator::new();
        let cfg = config(100, 50, 2, 2);
        // 3 of 4 leaves are "busy" (>= 100ms): 75% > 50% threshold.
        let rtts = vec![
            Duration::from_millis(200),
            Duration::from_millis(200),
            Duration::from_millis(200),
            Duration::from_millis(1),
        ];
        assert_eq!(evaluator.run(&rtts, 4, &cfg), None); // window not yet complete
        let reduced = evaluator.run(&rtts, 4, &cfg).expect("window complete, busy share exceeded");
        assert!(reduced <= 4 / 2);
        assert!(reduced >= cfg.adaptive_minimum_leaves);
    }

    #[test]
    fn counters_reset_after_a_completed_window() {
        let mut evaluator = AdaptiveHubEvaluator::new();
        let cfg = config(100, 50, 1, 1);
        let busy = vec![Duration::from_millis(200)];
        let _ = evaluator.run(&busy, 4, &cfg);
        assert_eq!(evaluator.busy_periods, 0);
        assert_eq!(evaluator.total_periods, 0);
    }
}
