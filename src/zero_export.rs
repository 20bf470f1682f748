#![allow(dead_code)]
//! Zero-Export PI controller (Component H, spec §4.7). Adapts the teacher's
//! generic [`crate::controller::pid`] shape to the literal Zero-Export
//! algorithm: a proportional term driven directly by the grid meter reading,
//! an integral term with discard-on-saturation anti-windup, and a hysteresis
//! gate before a new percentage is ever committed to an inverter.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::types::ZeroExportPidState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroExportConfig {
    /// Desired steady-state grid import, in watts (negative allows export).
    pub max_grid_w: f32,
    /// Floor on the commanded limit percentage; never commands below this.
    pub minimum_limit_pct: f64,
    /// Minimum change in requested watts before a new command is issued.
    pub power_hysteresis_w: f32,
    /// Integral time constant, in seconds.
    pub tn_seconds: f64,
    /// Inverters this controller is allowed to drive, advanced round-robin.
    pub selected_serials: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroExportDecision {
    pub limit_pct: f64,
    pub changed: bool,
}

pub struct ZeroExportController {
    config: ZeroExportConfig,
    state: RwLock<ZeroExportPidState>,
    last_committed_w: RwLock<Option<f32>>,
    round_robin_index: AtomicUsize,
}

impl ZeroExportController {
    pub fn new(config: ZeroExportConfig) -> Self {
        Self { config, state: RwLock::new(ZeroExportPidState::default()), last_committed_w: RwLock::new(None), round_robin_index: AtomicUsize::new(0) }
    }

    /// Next inverter serial to drive this tick, advancing the round-robin
    /// cursor (spec §4.7: "one inverter advanced per tick").
    pub fn next_serial(&self) -> Option<&str> {
        if self.config.selected_serials.is_empty() {
            return None;
        }
        let idx = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % self.config.selected_serials.len();
        Some(self.config.selected_serials[idx].as_str())
    }

    /// Computes the new commanded limit percentage from a fresh meter
    /// reading and the summed max power of reachable selected inverters.
    pub async fn tick(&self, meter_reading_w: f32, total_max_power_w: f32, now_ms: u32) -> ZeroExportDecision {
        let mut state = self.state.write().await;

        let denom = (total_max_power_w as f64).max(1.0);
        let p = 100.0 * (meter_reading_w as f64 + self.config.max_grid_w as f64) / denom;

        let dt_ms = state.previous_timestamp_ms.map(|prev| now_ms.wrapping_sub(prev)).unwrap_or(0);
        let i_new = p * dt_ms as f64 / (1000.0 * self.config.tn_seconds.max(0.001));

        let candidate_integral = state.previous_integral_term_pct + i_new;
        let raw = state.previous_payload_percent + p + candidate_integral;
        let clamped = raw.clamp(self.config.minimum_limit_pct, 100.0);
        let saturated = (clamped - raw).abs() > f64::EPSILON;

        state.previous_timestamp_ms = Some(now_ms);
        state.previous_payload_percent = clamped;
        if !saturated {
            state.previous_integral_term_pct = candidate_integral;
        }
        drop(state);

        let requested_w = clamped / 100.0 * total_max_power_w as f64;
        let mut last = self.last_committed_w.write().await;
        let changed = last.map(|prev| (requested_w as f32 - prev).abs() > self.config.power_hysteresis_w).unwrap_or(true);
        if changed {
            *last = Some(requested_w as f32);
        }

        ZeroExportDecision { limit_pct: clamped, changed }
    }

    pub async fn reset(&self) {
        *self.state.write().await = ZeroExportPidState::default();
        *self.last_committed_w.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ZeroExportConfig {
        ZeroExportConfig {
            max_grid_w: 0.0,
            minimum_limit_pct: 1.0,
            power_hysteresis_w: 5.0,
            tn_seconds: 5.0,
            selected_serials: vec!["S1".into(), "S2".into()],
        }
    }

    #[tokio::test]
    async fn first_tick_against_import_commits_a_positive_limit() {
        let ctrl = ZeroExportController::new(config());
        let decision = ctrl.tick(580.0, 1000.0, 1_000).await;
        assert!((decision.limit_pct - 58.0).abs() < 0.5);
        assert!(decision.changed);
    }

    #[tokio::test]
    async fn repeated_identical_reading_eventually_stabilizes_within_hysteresis() {
        let ctrl = ZeroExportController::new(config());
        ctrl.tick(0.0, 1000.0, 0).await;
        let mut last = ZeroExportDecision { limit_pct: 0.0, changed: true };
        for t in (1000..6000).step_by(1000) {
            last = ctrl.tick(0.0, 1000.0, t).await;
        }
        assert!(!last.changed || last.limit_pct <= config().minimum_limit_pct + 0.01);
    }

    #[tokio::test]
    async fn never_commands_below_minimum_limit() {
        let ctrl = ZeroExportController::new(config());
        let decision = ctrl.tick(-5000.0, 1000.0, 1_000).await;
        assert!(decision.limit_pct >= config().minimum_limit_pct);
    }

    #[test]
    fn round_robin_cycles_through_selected_serials() {
        let ctrl = ZeroExportController::new(config());
        assert_eq!(ctrl.next_serial(), Some("S1"));
        assert_eq!(ctrl.next_serial(), Some("S2"));
        assert_eq!(ctrl.next_serial(), Some("S1"));
    }
}
