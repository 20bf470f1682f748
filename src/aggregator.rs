#![allow(dead_code)]
//! Freshness-weighted voltage/SoC aggregation (Component D, spec §4.5
//! `load_corrected_voltage`). Merges whichever of BMS/MPPT/inverter-DC
//! voltage readings is freshest into the single figure the threshold logic
//! reasons about.

use crate::domain::bms::BatterySnapshot;
use crate::domain::inverter::InverterStats;
use crate::domain::mppt::MpptSnapshot;

/// Maximum age, in milliseconds, for a BMS reading to be trusted (spec §4.5).
pub const BMS_FRESHNESS_MS: u32 = 60_000;

/// `battery_voltage` := BMS (if < 60 s old), else MPPT output voltage, else
/// inverter DC voltage reading.
pub fn battery_voltage(bms: &BatterySnapshot, mppt: &MpptSnapshot, inverter_dc_voltage_v: Option<f32>) -> Option<f32> {
    if bms.voltage_age_ms < BMS_FRESHNESS_MS {
        return Some(bms.voltage_v);
    }
    if mppt.data_valid {
        return Some(mppt.output_voltage_v);
    }
    inverter_dc_voltage_v
}

/// `load_corrected_voltage := battery_voltage + ac_power * correction_factor`.
pub fn load_corrected_voltage(battery_voltage_v: f32, ac_power_w: f32, correction_factor: f32) -> f32 {
    battery_voltage_v + ac_power_w * correction_factor
}

/// SoC is trusted only if the BMS publishes a value no older than 60 s.
pub fn trusted_soc_percent(bms: &BatterySnapshot) -> Option<f32> {
    if bms.soc_age_ms < BMS_FRESHNESS_MS {
        Some(bms.soc_percent)
    } else {
        None
    }
}

pub fn total_ac_power_w(stats: &InverterStats) -> f32 {
    stats.total_ac_power_w()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bms::BmsAlarms;

    fn bms(voltage_age_ms: u32) -> BatterySnapshot {
        BatterySnapshot {
            voltage_v: 52.0,
            soc_percent: 70.0,
            voltage_age_ms,
            soc_age_ms: voltage_age_ms,
            charge_enabled: true,
            charge_immediately: false,
            recommended_charge_voltage_v: 57.0,
            recommended_charge_current_a: 10.0,
            charge_temperature_valid: true,
            alarms: BmsAlarms::default(),
        }
    }

    #[test]
    fn prefers_fresh_bms_voltage() {
        let v = battery_voltage(&bms(1000), &MpptSnapshot::default(), Some(48.0));
        assert_eq!(v, Some(52.0));
    }

    #[test]
    fn falls_back_to_mppt_when_bms_stale() {
        let mppt = MpptSnapshot { data_valid: true, output_voltage_v: 49.5, output_power_w: 100.0, last_update_ms: 0 };
        let v = battery_voltage(&bms(70_000), &mppt, Some(48.0));
        assert_eq!(v, Some(49.5));
    }

    #[test]
    fn falls_back_to_inverter_dc_as_last_resort() {
        let v = battery_voltage(&bms(70_000), &MpptSnapshot::default(), Some(47.5));
        assert_eq!(v, Some(47.5));
    }

    #[test]
    fn soc_is_untrusted_past_freshness_window() {
        assert_eq!(trusted_soc_percent(&bms(60_001)), None);
        assert_eq!(trusted_soc_percent(&bms(59_999)), Some(70.0));
    }

    #[test]
    fn load_corrected_voltage_applies_linear_correction() {
        let v = load_corrected_voltage(50.0, 200.0, 0.01);
        assert!((v - 52.0).abs() < 1e-6);
    }
}
