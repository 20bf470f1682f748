#![allow(dead_code)]
//! Plain data model shared across components. Mirrors spec §3: the DPC
//! exclusively owns these types; `BatterySnapshot`/`MpptSnapshot`/
//! `PowerMeterSnapshot` are borrowed views published by external
//! collaborators (see `crate::domain::{bms, mppt, meter}`).

use serde::{Deserialize, Serialize};

/// Charger fault bits, `SYSTEM_STATUS`-adjacent `FaultStatus` word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultBits {
    pub otp: bool,
    pub ovp: bool,
    pub ocp: bool,
    pub short: bool,
    pub ac_fail: bool,
    pub op_off: bool,
    pub hi_temp: bool,
}

impl FaultBits {
    pub fn any(&self) -> bool {
        self.otp || self.ovp || self.ocp || self.short || self.ac_fail || self.op_off || self.hi_temp
    }
}

/// Charge-stage bitfield (`CHG_STATUS`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeStageBits {
    pub fullm: bool,
    pub ccm: bool,
    pub cvm: bool,
    pub fvm: bool,
    pub wakeup_stop: bool,
    pub btnc: bool,
    pub ntcer: bool,
    pub cctof: bool,
    pub cvtof: bool,
    pub fvtof: bool,
}

/// System status bitfield (`SYSTEM_STATUS`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatusBits {
    pub dc_ok: bool,
    pub initial_state: bool,
    pub eeper: bool,
}

/// Charge curve setpoints, clamped by `charger::registers` before any write.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveParameters {
    pub cc_current_a: f32,
    pub cv_voltage_v: f32,
    pub fv_voltage_v: f32,
    pub tc_taper_current_a: f32,
    pub cc_timeout_min: u16,
    pub cv_timeout_min: u16,
    pub fv_timeout_min: u16,
}

/// Preset selector for `CURVE_CONFIG.CUVS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurvePreset {
    Customized,
    Preset1,
    Preset2,
    Preset3,
}

/// Temperature-compensation selector for `CURVE_CONFIG.TCS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempCompensation {
    Disabled,
    MinusThreeMvPerCPerCell,
    MinusFourMvPerCPerCell,
    MinusFiveMvPerCPerCell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageCount {
    ThreeStage,
    TwoStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveConfig {
    pub preset: CurvePreset,
    pub temp_comp: TempCompensation,
    pub stages: StageCount,
    pub curve_function_enabled: bool,
}

/// Identification strings read once at setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargerIdentity {
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    pub factory: String,
    pub date: String,
    pub serial: String,
}

/// Full mirrored snapshot of the charger PSU (spec §3 `RectifierState`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectifierState {
    pub operation_on: bool,
    pub set_output_voltage_v: f32,
    pub set_output_current_a: f32,
    pub measured_output_voltage_v: f32,
    pub measured_output_current_a: f32,
    pub measured_output_power_w: f32,
    pub input_voltage_v: f32,
    pub input_power_w: f32,
    pub efficiency: f32,
    pub internal_temperature_c: f32,
    pub fault: FaultBits,
    pub charge_stage: ChargeStageBits,
    pub system_status: SystemStatusBits,
    pub curve: CurveParameters,
    pub curve_config: CurveConfig,
    pub identity: ChargerIdentity,
}

impl RectifierState {
    /// All-zero/off fields with the customised 3-stage curve configuration
    /// described in spec §4.2 step 4, before the setup writes land.
    pub fn uninitialized() -> Self {
        Self {
            operation_on: false,
            set_output_voltage_v: 0.0,
            set_output_current_a: 0.0,
            measured_output_voltage_v: 0.0,
            measured_output_current_a: 0.0,
            measured_output_power_w: 0.0,
            input_voltage_v: 0.0,
            input_power_w: 0.0,
            efficiency: 0.0,
            internal_temperature_c: 0.0,
            fault: FaultBits::default(),
            charge_stage: ChargeStageBits::default(),
            system_status: SystemStatusBits::default(),
            curve: CurveParameters {
                cc_current_a: 0.0,
                cv_voltage_v: 0.0,
                fv_voltage_v: 0.0,
                tc_taper_current_a: 0.0,
                cc_timeout_min: 600,
                cv_timeout_min: 600,
                fv_timeout_min: 600,
            },
            curve_config: CurveConfig {
                preset: CurvePreset::Customized,
                temp_comp: TempCompensation::MinusThreeMvPerCPerCell,
                stages: StageCount::ThreeStage,
                curve_function_enabled: false,
            },
            identity: ChargerIdentity::default(),
        }
    }
}

/// Charger on/off/regulating state machine (spec §4.2 "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargerRunState {
    Off,
    Starting,
    Running,
    Stopping,
}

/// Pending command state for one inverter (spec §3 `InverterCommandTicket`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InverterCommandTicket {
    pub desired_on: Option<bool>,
    pub desired_limit_w: Option<u32>,
    pub opened_at_ms: u32,
    pub timeout_count: u32,
}

impl InverterCommandTicket {
    pub fn is_empty(&self) -> bool {
        self.desired_on.is_none() && self.desired_limit_w.is_none()
    }
}

/// Status codes surfaced by the Dynamic Power Limiter (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
pub enum DpcStatus {
    Initializing,
    DisabledByConfig,
    DisabledByMqtt,
    WaitingForValidTimestamp,
    PowerMeterPending,
    InverterInvalid,
    InverterChanged,
    InverterOffline,
    InverterCommandsDisabled,
    InverterLimitPending,
    InverterPowerCmdPending,
    InverterDevInfoPending,
    InverterStatsPending,
    CalculatedLimitBelowMinLimit,
    UnconditionalSolarPassthrough,
    NoVeDirect,
    NoEnergy,
    ChargerActive,
    Stable,
    TemperatureRange,
    BatteryNotInitialized,
    DisconnectFromBattery,
}

/// Output of the Dynamic Power Limiter's per-tick pipeline (spec §3 `DpcDecision`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DpcDecision {
    pub status: DpcStatus,
    pub new_limit_w: Option<u32>,
    pub shutdown: bool,
}

impl DpcDecision {
    pub fn shutdown(status: DpcStatus) -> Self {
        Self { status, new_limit_w: None, shutdown: true }
    }

    pub fn limit(status: DpcStatus, watts: u32) -> Self {
        Self { status, new_limit_w: Some(watts), shutdown: false }
    }

    pub fn pending(status: DpcStatus) -> Self {
        Self { status, new_limit_w: None, shutdown: false }
    }
}

/// DC power switch sequencer phase (spec §3 `DcSwitchPhase`, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DcSwitchPhase {
    Idle = 0,
    PreDisconnect = 1,
    Precharge = 2,
    MainOn = 3,
    Settle = 4,
}

/// Zero-Export integrator state (spec §3 `PidState`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ZeroExportPidState {
    pub previous_integral_term_pct: f64,
    pub previous_timestamp_ms: Option<u32>,
    pub previous_payload_percent: f64,
}

/// Operator mode (spec §4.5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorMode {
    #[default]
    Normal,
    Disabled,
    UnconditionalFullSolarPassthrough,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_empty_when_both_targets_absent() {
        let t = InverterCommandTicket::default();
        assert!(t.is_empty());
    }

    #[test]
    fn ticket_not_empty_with_pending_limit() {
        let t = InverterCommandTicket { desired_limit_w: Some(500), ..Default::default() };
        assert!(!t.is_empty());
    }
}
