#![allow(dead_code)]
//! Dynamic Power Limiter (Component G, spec §4.6): the seventeen-step
//! per-tick pipeline that decides the AC power limit commanded to the
//! primary (meter-following) inverter. Grounded on
//! `original_source/src/PowerLimiter.cpp`'s decision structure, reworked as
//! a pure `evaluate` function over an explicit input snapshot so the
//! pipeline is testable without a live bus.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::domain::types::{DpcDecision, DpcStatus, OperatorMode};

/// Below this much AC-equivalent solar power, solar is treated as "none"
/// (spec §4.6 step 13, §9 Open Question #3).
pub const MIN_USEFUL_SOLAR_W: f32 = 20.0;
/// Fallback AC/DC conversion efficiency when the inverter isn't currently
/// producing (so no live efficiency reading is available).
pub const DEFAULT_INVERTER_EFFICIENCY: f32 = 0.967;
pub const BACKOFF_START_MS: u32 = 128;
pub const BACKOFF_MAX_MS: u32 = 1024;
/// Shading compensation engages when a channel is below this fraction of
/// its expected even share.
const SHADING_THRESHOLD_FRACTION: f32 = 0.98;
const SHADING_MIN_EXPECTED_PER_CHANNEL_W: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub lower_limit_w: u32,
    pub upper_limit_w: u32,
    pub hysteresis_w: u32,
    pub target_consumption_w: f32,
    pub meter_includes_inverter: bool,
    pub solar_powered: bool,
    pub base_load_fallback_w: f32,
    pub passthrough_losses_pct: f32,
    pub restart_hour: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct TickInputs {
    pub now_ms: u32,
    pub wall_clock_present: bool,
    pub mode: OperatorMode,
    pub battery_initialized: bool,
    pub discharge_temperature_valid: bool,
    pub inverter_settled: bool,
    pub inverter_reachable: bool,
    pub inverter_commands_enabled: bool,
    pub inverter_max_power_w: u32,
    pub inverter_stats_fresh: bool,
    pub meter_valid: bool,
    pub meter_fresh: bool,
    pub meter_reading_w: f32,
    pub inverter_output_w: f32,
    pub inverter_producing: bool,
    pub inverter_reported_efficiency: Option<f32>,
    pub battery_power_allowed: bool,
    pub mppt_output_w: f32,
    pub fsp_latched: bool,
    pub charger_running: bool,
    pub channel_ac_powers_w: Vec<f32>,
    pub last_commanded_limit_w: Option<u32>,
}

#[derive(Debug, Default)]
struct LimiterState {
    backoff_ms: u32,
    last_calc_ms: u32,
}

pub struct PowerLimiter {
    config: LimiterConfig,
    state: RwLock<LimiterState>,
}

impl PowerLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self { config, state: RwLock::new(LimiterState { backoff_ms: BACKOFF_START_MS, last_calc_ms: 0 }) }
    }

    /// Back-off gate (step 9): at most one calculation per `backoff_ms`,
    /// doubling up to `BACKOFF_MAX_MS` on no-change ticks and resetting on
    /// change.
    pub async fn backoff_gate(&self, now_ms: u32) -> bool {
        let state = self.state.read().await;
        now_ms.wrapping_sub(state.last_calc_ms) >= state.backoff_ms
    }

    async fn record_calc(&self, now_ms: u32, changed: bool) {
        let mut state = self.state.write().await;
        state.last_calc_ms = now_ms;
        state.backoff_ms = if changed { BACKOFF_START_MS } else { (state.backoff_ms * 2).min(BACKOFF_MAX_MS) };
    }

    /// Steps 3-17 of the pipeline, given that steps 1-2 (timestamp present,
    /// coordinator convergence) and step 5 (inverter settled) have already
    /// been checked by the caller.
    pub async fn evaluate(&self, inputs: &TickInputs) -> DpcDecision {
        if !inputs.wall_clock_present {
            return DpcDecision::pending(DpcStatus::WaitingForValidTimestamp);
        }
        if !inputs.inverter_settled {
            return DpcDecision::pending(DpcStatus::Stable);
        }

        match inputs.mode {
            OperatorMode::Disabled => return DpcDecision::shutdown(DpcStatus::DisabledByConfig),
            OperatorMode::UnconditionalFullSolarPassthrough => {
                let solar_ac = self.solar_ac_power(inputs);
                let limit = if self.config.solar_powered { self.config.upper_limit_w as f32 } else { solar_ac };
                return self.clamp_and_commit(inputs, limit, DpcStatus::UnconditionalSolarPassthrough).await;
            }
            OperatorMode::Normal => {}
        }

        if !inputs.battery_initialized {
            return DpcDecision::pending(DpcStatus::BatteryNotInitialized);
        }
        if !inputs.discharge_temperature_valid {
            return DpcDecision::pending(DpcStatus::TemperatureRange);
        }
        if !inputs.inverter_reachable {
            return DpcDecision::pending(DpcStatus::InverterOffline);
        }
        if !inputs.inverter_commands_enabled {
            return DpcDecision::pending(DpcStatus::InverterCommandsDisabled);
        }
        if inputs.inverter_max_power_w == 0 {
            return DpcDecision::pending(DpcStatus::InverterDevInfoPending);
        }
        if !inputs.inverter_stats_fresh {
            return DpcDecision::pending(DpcStatus::InverterStatsPending);
        }

        let meter_reading_w = if inputs.meter_valid {
            if !inputs.meter_fresh {
                return DpcDecision::pending(DpcStatus::PowerMeterPending);
            }
            inputs.meter_reading_w
        } else {
            self.config.base_load_fallback_w
        };

        if !self.backoff_gate(inputs.now_ms).await {
            return DpcDecision::pending(DpcStatus::Stable);
        }

        let solar_ac = self.solar_ac_power(inputs);
        let meter_need = meter_reading_w + if self.config.meter_includes_inverter { inputs.inverter_output_w } else { 0.0 } - self.config.target_consumption_w;

        let raw_limit = if !inputs.battery_power_allowed {
            if solar_ac <= MIN_USEFUL_SOLAR_W {
                let decision = DpcDecision::shutdown(DpcStatus::NoEnergy);
                self.record_calc(inputs.now_ms, inputs.last_commanded_limit_w.is_some()).await;
                return decision;
            }
            meter_need.min(solar_ac)
        } else if inputs.fsp_latched {
            meter_need.max(solar_ac)
        } else {
            meter_need
        };

        if inputs.charger_running && !inputs.fsp_latched {
            let decision = DpcDecision::shutdown(DpcStatus::ChargerActive);
            self.record_calc(inputs.now_ms, inputs.last_commanded_limit_w.is_some()).await;
            return decision;
        }

        let shaded_limit = self.apply_shading_compensation(inputs, raw_limit);
        self.clamp_and_commit(inputs, shaded_limit, DpcStatus::Stable).await
    }

    fn solar_ac_power(&self, inputs: &TickInputs) -> f32 {
        if self.config.solar_powered {
            return f32::INFINITY;
        }
        let efficiency = if inputs.inverter_producing {
            inputs.inverter_reported_efficiency.unwrap_or(DEFAULT_INVERTER_EFFICIENCY)
        } else {
            DEFAULT_INVERTER_EFFICIENCY
        };
        let passthrough_factor = 1.0 - self.config.passthrough_losses_pct / 100.0;
        inputs.mppt_output_w * efficiency * passthrough_factor
    }

    fn apply_shading_compensation(&self, inputs: &TickInputs, limit_w: f32) -> f32 {
        let channels = inputs.channel_ac_powers_w.len();
        if channels < 2 {
            return limit_w;
        }
        let expected_total = limit_w;
        if expected_total <= SHADING_MIN_EXPECTED_PER_CHANNEL_W * channels as f32 {
            return limit_w;
        }
        let expected_per_channel = expected_total / channels as f32;
        let unshaded = inputs.channel_ac_powers_w.iter().filter(|&&p| p >= expected_per_channel * SHADING_THRESHOLD_FRACTION).count();
        if unshaded == 0 || unshaded == channels {
            return limit_w;
        }
        limit_w * (channels as f32 / unshaded as f32)
    }

    async fn clamp_and_commit(&self, inputs: &TickInputs, raw_limit: f32, success_status: DpcStatus) -> DpcDecision {
        let upper = self.config.upper_limit_w.min(inputs.inverter_max_power_w);
        let clamped = raw_limit.clamp(self.config.lower_limit_w as f32, upper as f32);

        let decision = if raw_limit < self.config.lower_limit_w as f32 {
            if self.config.solar_powered {
                DpcDecision::limit(DpcStatus::CalculatedLimitBelowMinLimit, self.config.lower_limit_w)
            } else {
                DpcDecision::shutdown(DpcStatus::CalculatedLimitBelowMinLimit)
            }
        } else {
            let new_limit = clamped.round() as u32;
            let changed = inputs.last_commanded_limit_w.map(|last| (new_limit as i64 - last as i64).unsigned_abs() as u32 > self.config.hysteresis_w).unwrap_or(true);
            if changed {
                DpcDecision::limit(success_status, new_limit)
            } else {
                DpcDecision::pending(DpcStatus::Stable)
            }
        };

        let changed = matches!(decision.new_limit_w, Some(w) if Some(w) != inputs.last_commanded_limit_w) || decision.shutdown;
        self.record_calc(inputs.now_ms, changed).await;
        decision
    }

    /// Periodic restart: milliseconds until the next occurrence of
    /// `restart_hour`, given the current wall-clock hour and minute.
    pub fn ms_until_restart_hour(&self, current_hour: u8, current_minute: u8, current_second: u8) -> Option<u32> {
        let target = self.config.restart_hour?;
        let now_s = current_hour as i64 * 3600 + current_minute as i64 * 60 + current_second as i64;
        let target_s = target as i64 * 3600;
        let delta_s = if target_s > now_s { target_s - now_s } else { target_s + 86_400 - now_s };
        Some((delta_s * 1000) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> LimiterConfig {
        LimiterConfig {
            lower_limit_w: 10,
            upper_limit_w: 800,
            hysteresis_w: 10,
            target_consumption_w: 0.0,
            meter_includes_inverter: true,
            solar_powered: false,
            base_load_fallback_w: 0.0,
            passthrough_losses_pct: 0.0,
            restart_hour: None,
        }
    }

    fn base_inputs() -> TickInputs {
        TickInputs {
            now_ms: 10_000,
            wall_clock_present: true,
            mode: OperatorMode::Normal,
            battery_initialized: true,
            discharge_temperature_valid: true,
            inverter_settled: true,
            inverter_reachable: true,
            inverter_commands_enabled: true,
            inverter_max_power_w: 800,
            inverter_stats_fresh: true,
            meter_valid: true,
            meter_fresh: true,
            meter_reading_w: 350.0,
            inverter_output_w: 200.0,
            inverter_producing: true,
            inverter_reported_efficiency: None,
            battery_power_allowed: true,
            mppt_output_w: 0.0,
            fsp_latched: false,
            charger_running: false,
            channel_ac_powers_w: vec![],
            last_commanded_limit_w: None,
        }
    }

    #[tokio::test]
    async fn s1_battery_discharge_evening_stable_load() {
        let limiter = PowerLimiter::new(base_config());
        let decision = limiter.evaluate(&base_inputs()).await;
        assert_eq!(decision.new_limit_w, Some(550));
    }

    #[tokio::test]
    async fn s2_solar_sufficient_no_battery() {
        let mut config = base_config();
        config.solar_powered = false;
        let limiter = PowerLimiter::new(config);
        let mut inputs = base_inputs();
        inputs.mode = OperatorMode::UnconditionalFullSolarPassthrough;
        inputs.mppt_output_w = 120.0;
        inputs.meter_reading_w = 200.0;
        inputs.inverter_reported_efficiency = Some(115.0 / 120.0);
        let decision = limiter.evaluate(&inputs).await;
        assert_eq!(decision.new_limit_w, Some(115));
    }

    #[tokio::test]
    async fn s3_shortfall_forces_shutdown() {
        let limiter = PowerLimiter::new(base_config());
        let mut inputs = base_inputs();
        inputs.battery_power_allowed = false;
        inputs.mppt_output_w = 0.0;
        inputs.meter_reading_w = 400.0;
        let decision = limiter.evaluate(&inputs).await;
        assert!(decision.shutdown);
        assert_eq!(decision.status, DpcStatus::NoEnergy);
    }

    #[tokio::test]
    async fn below_lower_limit_shuts_down_unless_solar_powered() {
        let mut config = base_config();
        config.lower_limit_w = 600;
        let limiter = PowerLimiter::new(config);
        let decision = limiter.evaluate(&base_inputs()).await;
        assert!(decision.shutdown);
        assert_eq!(decision.status, DpcStatus::CalculatedLimitBelowMinLimit);
    }

    #[tokio::test]
    async fn below_lower_limit_holds_when_solar_powered() {
        let mut config = base_config();
        config.lower_limit_w = 600;
        config.solar_powered = true;
        let limiter = PowerLimiter::new(config);
        let decision = limiter.evaluate(&base_inputs()).await;
        assert!(!decision.shutdown);
        assert_eq!(decision.new_limit_w, Some(600));
    }

    #[tokio::test]
    async fn above_upper_limit_clamps() {
        let limiter = PowerLimiter::new(base_config());
        let mut inputs = base_inputs();
        inputs.meter_reading_w = 900.0;
        let decision = limiter.evaluate(&inputs).await;
        assert_eq!(decision.new_limit_w, Some(800));
    }

    #[tokio::test]
    async fn charger_active_without_fsp_shuts_down() {
        let limiter = PowerLimiter::new(base_config());
        let mut inputs = base_inputs();
        inputs.charger_running = true;
        inputs.fsp_latched = false;
        let decision = limiter.evaluate(&inputs).await;
        assert!(decision.shutdown);
        assert_eq!(decision.status, DpcStatus::ChargerActive);
    }

    #[test]
    fn restart_hour_computes_wraparound_correctly() {
        let mut config = base_config();
        config.restart_hour = Some(3);
        let limiter = PowerLimiter::new(config);
        let ms = limiter.ms_until_restart_hour(23, 0, 0).unwrap();
        assert_eq!(ms, 4 * 3600 * 1000);
    }
}
