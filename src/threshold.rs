#![allow(dead_code)]
//! Threshold & mode logic (Component F, spec §4.5): start/stop hysteresis,
//! the full-solar-passthrough latch, and the night-use override.

use serde::{Deserialize, Serialize};

use crate::domain::types::OperatorMode;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub soc_start_pct: f32,
    pub soc_stop_pct: f32,
    pub voltage_start_v: f32,
    pub voltage_stop_v: f32,
    pub fsp_entry_pct: f32,
    pub fsp_exit_pct: f32,
    pub night_use_enabled: bool,
}

#[derive(Debug, Default)]
pub struct ThresholdState {
    pub(crate) fsp_latched: bool,
    discharge_permitted: bool,
}

pub struct ThresholdLogic {
    config: ThresholdConfig,
}

impl ThresholdLogic {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    pub fn start_reached(&self, soc_pct: Option<f32>, load_corrected_voltage_v: f32) -> bool {
        match soc_pct {
            Some(soc) => soc >= self.config.soc_start_pct,
            None => load_corrected_voltage_v >= self.config.voltage_start_v,
        }
    }

    pub fn stop_reached(&self, soc_pct: Option<f32>, load_corrected_voltage_v: f32) -> bool {
        match soc_pct {
            Some(soc) => soc <= self.config.soc_stop_pct,
            None => load_corrected_voltage_v <= self.config.voltage_stop_v,
        }
    }

    /// Updates the start/stop discharge-permission flag with hysteresis:
    /// once `start_reached`, discharge remains permitted until `stop_reached`.
    pub fn update_discharge_permission(&self, state: &mut ThresholdState, soc_pct: Option<f32>, load_corrected_voltage_v: f32) -> bool {
        if self.start_reached(soc_pct, load_corrected_voltage_v) {
            state.discharge_permitted = true;
        } else if self.stop_reached(soc_pct, load_corrected_voltage_v) {
            state.discharge_permitted = false;
        }
        state.discharge_permitted
    }

    /// Updates the full-solar-passthrough latch: engages above the entry
    /// threshold, disengages only below the exit threshold.
    pub fn update_fsp_latch(&self, state: &mut ThresholdState, soc_pct: Option<f32>, load_corrected_voltage_v: f32) -> bool {
        let value = soc_pct.unwrap_or(load_corrected_voltage_v);
        if value >= self.config.fsp_entry_pct {
            state.fsp_latched = true;
        } else if value < self.config.fsp_exit_pct {
            state.fsp_latched = false;
        }
        state.fsp_latched
    }

    /// `true` if discharge is permitted right now, accounting for the
    /// night-use override (solar power is zero, FSP is engaged, night-use
    /// enabled) and unconditionally vetoed by BMS alarms.
    pub fn discharge_permitted(&self, state: &ThresholdState, solar_power_w: f32, bms_alarm_active: bool, mode: OperatorMode) -> bool {
        if bms_alarm_active {
            return false;
        }
        match mode {
            OperatorMode::Disabled => false,
            OperatorMode::UnconditionalFullSolarPassthrough => true,
            OperatorMode::Normal => {
                if solar_power_w <= 0.0 && state.fsp_latched && self.config.night_use_enabled {
                    true
                } else {
                    state.discharge_permitted
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThresholdConfig {
        ThresholdConfig {
            soc_start_pct: 80.0,
            soc_stop_pct: 20.0,
            voltage_start_v: 52.0,
            voltage_stop_v: 48.0,
            fsp_entry_pct: 90.0,
            fsp_exit_pct: 40.0,
            night_use_enabled: true,
        }
    }

    #[test]
    fn soc_exactly_at_thresholds_triggers_boundary() {
        let logic = ThresholdLogic::new(config());
        assert!(logic.start_reached(Some(80.0), 0.0));
        assert!(logic.stop_reached(Some(20.0), 0.0));
    }

    #[test]
    fn hysteresis_keeps_discharge_on_between_thresholds() {
        let logic = ThresholdLogic::new(config());
        let mut state = ThresholdState::default();
        assert!(logic.update_discharge_permission(&mut state, Some(85.0), 0.0));
        assert!(logic.update_discharge_permission(&mut state, Some(50.0), 0.0));
        assert!(!logic.update_discharge_permission(&mut state, Some(15.0), 0.0));
    }

    #[test]
    fn fsp_latch_requires_drop_below_exit_to_release() {
        let logic = ThresholdLogic::new(config());
        let mut state = ThresholdState::default();
        assert!(logic.update_fsp_latch(&mut state, Some(92.0), 0.0));
        assert!(logic.update_fsp_latch(&mut state, Some(60.0), 0.0));
        assert!(!logic.update_fsp_latch(&mut state, Some(30.0), 0.0));
    }

    #[test]
    fn bms_alarm_vetoes_even_unconditional_passthrough() {
        let logic = ThresholdLogic::new(config());
        let state = ThresholdState { fsp_latched: true, discharge_permitted: true };
        assert!(!logic.discharge_permitted(&state, 0.0, true, OperatorMode::UnconditionalFullSolarPassthrough));
    }

    #[test]
    fn night_use_overrides_stop_threshold_when_latched() {
        let logic = ThresholdLogic::new(config());
        let state = ThresholdState { fsp_latched: true, discharge_permitted: false };
        assert!(logic.discharge_permitted(&state, 0.0, false, OperatorMode::Normal));
    }
}
