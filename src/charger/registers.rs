#![allow(dead_code)]
//! Charger model table and setpoint clamping (spec §4.2). Grounded on
//! `original_source/include/MeanWell_can.h`'s `NPB_Model_t` enum and the
//! min/max current table hard-coded next to each model string compare in
//! `original_source/src/MeanWell_can.cpp`.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerModel {
    Npb450_48,
    Npb750_48,
    Npb1200_48,
    Npb1700_48,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelParseError {
    #[error("unrecognised charger model string: {0}")]
    UnknownModel(String),
    #[error("24 V packs are out of scope for this deployment: {0}")]
    UnsupportedVoltageClass(String),
}

impl ChargerModel {
    /// Parses a `MFR_MODEL` string such as "NPB-1200-48". 24 V variants are
    /// recognised but rejected, per spec §4.2: the appliance targets 48 V
    /// packs only, and silently accepting a 24 V unit risks an over-voltage
    /// condition on the battery.
    pub fn parse(model_str: &str) -> Result<Self, ModelParseError> {
        let trimmed = model_str.trim();
        match trimmed {
            "NPB-450-48" | "NBP-450-48" => Ok(Self::Npb450_48),
            "NPB-750-48" | "NBP-750-48" => Ok(Self::Npb750_48),
            "NPB-1200-48" | "NBP-1200-48" => Ok(Self::Npb1200_48),
            "NPB-1700-48" | "NBP-1700-48" => Ok(Self::Npb1700_48),
            s if s.ends_with("-24") => Err(ModelParseError::UnsupportedVoltageClass(s.to_string())),
            s => Err(ModelParseError::UnknownModel(s.to_string())),
        }
    }

    pub fn rated_power_w(&self) -> f32 {
        match self {
            Self::Npb450_48 => 450.0,
            Self::Npb750_48 => 750.0,
            Self::Npb1200_48 => 1200.0,
            Self::Npb1700_48 => 1700.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelLimits {
    pub min_current_a: f32,
    pub max_current_a: f32,
    pub default_cv_v: f32,
    pub default_fv_v: f32,
    pub min_voltage_v: f32,
    pub max_voltage_v: f32,
}

/// Writable output-voltage range is 42 ~ 80 V across the whole -48 V
/// rectifier family (`original_source/include/MeanWell_can.h`'s
/// `MEANWELL_MINIMAL_SET_VOLTAGE` and the `outputVoltageSet` comment).
const MIN_SET_VOLTAGE_V: f32 = 42.0;
const MAX_SET_VOLTAGE_V: f32 = 80.0;

pub fn model_limits(model: ChargerModel) -> ModelLimits {
    match model {
        ChargerModel::Npb450_48 => ModelLimits { min_current_a: 1.5, max_current_a: 7.5, default_cv_v: 57.6, default_fv_v: 55.2, min_voltage_v: MIN_SET_VOLTAGE_V, max_voltage_v: MAX_SET_VOLTAGE_V },
        ChargerModel::Npb750_48 => ModelLimits { min_current_a: 2.26, max_current_a: 11.3, default_cv_v: 57.6, default_fv_v: 55.2, min_voltage_v: MIN_SET_VOLTAGE_V, max_voltage_v: MAX_SET_VOLTAGE_V },
        ChargerModel::Npb1200_48 => ModelLimits { min_current_a: 3.6, max_current_a: 18.0, default_cv_v: 57.6, default_fv_v: 55.2, min_voltage_v: MIN_SET_VOLTAGE_V, max_voltage_v: MAX_SET_VOLTAGE_V },
        ChargerModel::Npb1700_48 => ModelLimits { min_current_a: 5.1, max_current_a: 25.5, default_cv_v: 57.6, default_fv_v: 55.2, min_voltage_v: MIN_SET_VOLTAGE_V, max_voltage_v: MAX_SET_VOLTAGE_V },
    }
}

/// Clamps a current setpoint into `[min_current_a, max_current_a]`.
pub fn clamp_current(limits: ModelLimits, current_a: f32) -> f32 {
    current_a.clamp(limits.min_current_a, limits.max_current_a)
}

/// Clamps a voltage setpoint into `[min_voltage, max_voltage]`.
pub fn clamp_voltage(min_voltage_v: f32, max_voltage_v: f32, voltage_v: f32) -> f32 {
    voltage_v.clamp(min_voltage_v, max_voltage_v)
}

/// FV is additionally clamped to never exceed CV.
pub fn clamp_fv_to_cv(fv_v: f32, cv_v: f32) -> f32 {
    fv_v.min(cv_v)
}

/// TC (taper current) is clamped to `[CC/10, CC/3.333]`.
pub fn clamp_taper_current(cc_a: f32, tc_a: f32) -> f32 {
    tc_a.clamp(cc_a / 10.0, cc_a / 3.333)
}

/// Piecewise-linear efficiency curve, fraction of rated power on the x
/// axis, scaled per-model. Beyond the last point the slope of the final
/// segment is extrapolated (Open Question #1 in DESIGN.md), matching
/// `original_source/src/MeanWell_can.cpp`'s `calcEfficency`. This is an
/// approximation derived from the NPB-1200-48 datasheet curve, not a
/// per-unit calibrated measurement.
const EFFICIENCY_CURVE: &[(f32, f32)] = &[
    (0.0, 0.750),
    (100.0, 0.900),
    (177.0, 0.9222),
    (222.0, 0.9535),
    (440.0, 0.9522),
    (666.0, 0.9498),
    (888.0, 0.9380),
    (1000.0, 0.9250),
    (1100.0, 0.9200),
    (1300.0, 0.9150),
];

pub fn efficiency_for_power(model: ChargerModel, output_power_w: f32) -> f32 {
    let scale = model.rated_power_w() / 1200.0;
    let scaled_x = output_power_w;

    for window in EFFICIENCY_CURVE.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        let sx0 = x0 * scale;
        let sx1 = x1 * scale;
        if scaled_x >= sx0 && scaled_x <= sx1 {
            let frac = (scaled_x - sx0) / (sx1 - sx0);
            return y0 + (y1 - y0) * frac;
        }
    }

    if scaled_x < EFFICIENCY_CURVE[0].0 * scale {
        return EFFICIENCY_CURVE[0].1;
    }

    // Extrapolate the final segment's slope beyond the last defined point.
    let (x0, y0) = EFFICIENCY_CURVE[EFFICIENCY_CURVE.len() - 2];
    let (x1, y1) = EFFICIENCY_CURVE[EFFICIENCY_CURVE.len() - 1];
    let sx0 = x0 * scale;
    let sx1 = x1 * scale;
    let slope = (y1 - y0) / (sx1 - sx0);
    y1 + slope * (scaled_x - sx1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_models() {
        assert_eq!(ChargerModel::parse("NPB-1200-48").unwrap(), ChargerModel::Npb1200_48);
        assert_eq!(ChargerModel::parse(" NPB-450-48 ").unwrap(), ChargerModel::Npb450_48);
    }

    #[test]
    fn rejects_24v_variants() {
        assert!(matches!(ChargerModel::parse("NPB-1200-24"), Err(ModelParseError::UnsupportedVoltageClass(_))));
    }

    #[test]
    fn rejects_unknown_model() {
        assert!(matches!(ChargerModel::parse("bogus"), Err(ModelParseError::UnknownModel(_))));
    }

    #[test]
    fn model_limits_match_table() {
        let l = model_limits(ChargerModel::Npb1200_48);
        assert_eq!(l.min_current_a, 3.6);
        assert_eq!(l.max_current_a, 18.0);
    }

    #[test]
    fn current_clamp_respects_bounds() {
        let l = model_limits(ChargerModel::Npb1200_48);
        assert_eq!(clamp_current(l, 0.0), 3.6);
        assert_eq!(clamp_current(l, 100.0), 18.0);
        assert_eq!(clamp_current(l, 10.0), 10.0);
    }

    #[test]
    fn fv_never_exceeds_cv() {
        assert_eq!(clamp_fv_to_cv(58.0, 57.0), 57.0);
        assert_eq!(clamp_fv_to_cv(56.0, 57.0), 56.0);
    }

    #[test]
    fn efficiency_interpolates_between_points() {
        let eff = efficiency_for_power(ChargerModel::Npb1200_48, 50.0);
        assert!(eff > 0.75 && eff < 0.90);
    }

    #[test]
    fn efficiency_extrapolates_beyond_last_point() {
        let at_last = efficiency_for_power(ChargerModel::Npb1200_48, 1300.0);
        let beyond = efficiency_for_power(ChargerModel::Npb1200_48, 1400.0);
        assert!(beyond < at_last, "extrapolated slope is negative past 1300 W");
    }
}
