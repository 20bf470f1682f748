#![allow(dead_code)]
//! Charger protocol engine (Component B, spec §4.2). Keeps `RectifierState`
//! mirrored from the charger PSU and exposes setpoint commands, the setup
//! sequence, and the automatic charge algorithm. Grounded on
//! `original_source/src/MeanWell_can.cpp`'s `loop`/`setupParameter`/
//! `setValue`/`onReceive`, reworked around the `CanBus` trait instead of a
//! direct ESP32 TWAI/MCP2515 driver.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::charger::registers::{clamp_current, clamp_fv_to_cv, clamp_taper_current, clamp_voltage, model_limits, ChargerModel, ModelLimits, ModelParseError};
use crate::charger::wire::{self, cmd, DecodedFrame, WireFlavour};
use crate::domain::bms::BatterySnapshot;
use crate::domain::types::{ChargeStageBits, ChargerRunState, CurveConfig, CurvePreset, FaultBits, RectifierState, StageCount, SystemStatusBits, TempCompensation};
use crate::hardware::can::{CanBus, CanError};

#[derive(Debug, Error)]
pub enum ChargerError {
    #[error(transparent)]
    Bus(#[from] CanError),
    #[error(transparent)]
    UnknownModel(#[from] ModelParseError),
    #[error("charger EEPROM fault reported, refusing further commands")]
    EepromFault,
    #[error("two consecutive CAN transactions failed")]
    TwoConsecutiveFailures,
}

const READBACK_TIMEOUT: Duration = Duration::from_millis(100);
const POLL_TIMEOUT: Duration = Duration::from_millis(200);
/// SoC percentage-point delta below the DPL start threshold at which
/// `charge_immediately` forces `max_current_a` regardless of the normal
/// zero-grid regulation loop (spec §4.2, §9 Open Question #4).
const IMMEDIATE_CHARGE_SOC_OFFSET_PCT: f32 = 10.0;

/// The six "rotating" reads issued one per poll tick (spec §4.2), plus the
/// two "fast" reads issued on every tick.
const ROTATING_READS: [u16; 6] = [cmd::READ_VIN, cmd::SYSTEM_STATUS, cmd::READ_TEMPERATURE_1, cmd::CHG_STATUS, cmd::OPERATION, cmd::FAULT_STATUS];
const FAST_READS: [u16; 2] = [cmd::READ_VOUT, cmd::READ_IOUT];

pub struct ChargerEngine {
    bus: Arc<dyn CanBus>,
    flavour: WireFlavour,
    model: ChargerModel,
    limits: ModelLimits,
    state: Arc<RwLock<RectifierState>>,
    run_state: Arc<RwLock<ChargerRunState>>,
    rotating_index: AtomicU32,
    consecutive_failures: AtomicU32,
    eeprom_fault: Arc<std::sync::atomic::AtomicBool>,
    hysteresis_a: f32,
}

impl ChargerEngine {
    pub fn new(bus: Arc<dyn CanBus>, flavour: WireFlavour, model: ChargerModel, hysteresis_a: f32) -> Self {
        Self {
            bus,
            flavour,
            model,
            limits: model_limits(model),
            state: Arc::new(RwLock::new(RectifierState::uninitialized())),
            run_state: Arc::new(RwLock::new(ChargerRunState::Off)),
            rotating_index: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            eeprom_fault: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            hysteresis_a,
        }
    }

    pub async fn state(&self) -> RectifierState {
        self.state.read().await.clone()
    }

    pub async fn run_state(&self) -> ChargerRunState {
        *self.run_state.read().await
    }

    pub fn has_eeprom_fault(&self) -> bool {
        self.eeprom_fault.load(Ordering::SeqCst)
    }

    /// Setup sequence run once on first connect (spec §4.2 steps 1-5).
    pub async fn setup(&self) -> Result<(), ChargerError> {
        self.write_confirm(cmd::OPERATION, 0).await?;

        self.write_confirm(cmd::VOUT_SET, wire::scale_to_raw(self.limits.default_cv_v - 0.25)).await?;
        self.write_confirm(cmd::IOUT_SET, wire::scale_to_raw(self.limits.min_current_a)).await?;
        self.write_confirm(cmd::CURVE_CC, wire::scale_to_raw(self.limits.min_current_a)).await?;
        self.write_confirm(cmd::CURVE_CV, wire::scale_to_raw(self.limits.default_cv_v)).await?;
        self.write_confirm(cmd::CURVE_FV, wire::scale_to_raw(self.limits.default_fv_v)).await?;
        self.write_confirm(cmd::CURVE_TC, wire::scale_to_raw(self.limits.min_current_a)).await?;

        {
            let mut st = self.state.write().await;
            st.curve_config = CurveConfig {
                preset: CurvePreset::Customized,
                temp_comp: TempCompensation::MinusThreeMvPerCPerCell,
                stages: StageCount::ThreeStage,
                curve_function_enabled: false,
            };
        }
        // CURVE_CONFIG write: engine drives on/off externally, function disabled.
        self.write_confirm(cmd::CURVE_CONFIG, 0).await?;
        // SYSTEM_CONFIG write: power-on initial behaviour = OFF.
        self.write_confirm(cmd::SYSTEM_CONFIG, 0).await?;

        info!(model = ?self.model, "charger setup complete");
        Ok(())
    }

    async fn write_confirm(&self, command: u16, raw_value: i32) -> Result<(), ChargerError> {
        let frame = wire::encode_write(self.flavour, command, raw_value);
        self.bus.send_frame(frame).await?;
        match self.bus.poll_frame(READBACK_TIMEOUT).await? {
            Some(frame) => {
                if let Some(decoded) = wire::decode_frame(self.flavour, &frame) {
                    self.apply_decoded(decoded).await;
                }
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(())
            }
            None => self.record_failure().await,
        }
    }

    async fn record_failure(&self) -> Result<(), ChargerError> {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= 2 {
            *self.run_state.write().await = ChargerRunState::Off;
            warn!("two consecutive charger CAN transactions failed, forcing OFF");
            return Err(ChargerError::TwoConsecutiveFailures);
        }
        Ok(())
    }

    async fn apply_decoded(&self, decoded: DecodedFrame) {
        let mut st = self.state.write().await;
        let v = wire::raw_to_scaled(decoded.raw_value);
        match decoded.command {
            cmd::OPERATION => st.operation_on = decoded.raw_value != 0,
            cmd::VOUT_SET => st.set_output_voltage_v = v,
            cmd::IOUT_SET => st.set_output_current_a = v,
            cmd::READ_VIN => st.input_voltage_v = v,
            cmd::READ_VOUT => {
                st.measured_output_voltage_v = v;
                st.measured_output_power_w = st.measured_output_current_a * v;
            }
            cmd::READ_IOUT => {
                st.measured_output_current_a = v;
                st.measured_output_power_w = v * st.measured_output_voltage_v;
            }
            cmd::READ_TEMPERATURE_1 => st.internal_temperature_c = v,
            cmd::FAULT_STATUS => {
                let bits = decoded.raw_value as u16;
                st.fault = FaultBits {
                    otp: bits & 0x01 != 0,
                    ovp: bits & 0x02 != 0,
                    ocp: bits & 0x04 != 0,
                    short: bits & 0x08 != 0,
                    ac_fail: bits & 0x10 != 0,
                    op_off: bits & 0x20 != 0,
                    hi_temp: bits & 0x40 != 0,
                };
            }
            cmd::CHG_STATUS => {
                let bits = decoded.raw_value as u16;
                st.charge_stage = ChargeStageBits {
                    fullm: bits & 0x01 != 0,
                    ccm: bits & 0x02 != 0,
                    cvm: bits & 0x04 != 0,
                    fvm: bits & 0x08 != 0,
                    wakeup_stop: bits & 0x10 != 0,
                    btnc: bits & 0x20 != 0,
                    ntcer: bits & 0x40 != 0,
                    cctof: bits & 0x80 != 0,
                    cvtof: bits & 0x100 != 0,
                    fvtof: bits & 0x200 != 0,
                };
            }
            cmd::SYSTEM_STATUS => {
                let bits = decoded.raw_value as u16;
                st.system_status = SystemStatusBits {
                    dc_ok: bits & 0x01 != 0,
                    initial_state: bits & 0x02 != 0,
                    eeper: bits & 0x04 != 0,
                };
                if st.system_status.eeper {
                    drop(st);
                    self.eeprom_fault.store(true, Ordering::SeqCst);
                    warn!("charger reports EEPROM fault, halting commands");
                    return;
                }
            }
            cmd::CURVE_CC => st.curve.cc_current_a = v,
            cmd::CURVE_CV => st.curve.cv_voltage_v = v,
            cmd::CURVE_FV => st.curve.fv_voltage_v = v,
            cmd::CURVE_TC => st.curve.tc_taper_current_a = v,
            _ => {}
        }
    }

    /// Polling cycle: one rotating read plus the two fast reads (spec §4.2).
    pub async fn poll_tick(&self) -> Result<(), ChargerError> {
        if self.has_eeprom_fault() {
            return Err(ChargerError::EepromFault);
        }

        let idx = self.rotating_index.fetch_add(1, Ordering::SeqCst) as usize % ROTATING_READS.len();
        self.read_one(ROTATING_READS[idx]).await?;
        for &c in &FAST_READS {
            self.read_one(c).await?;
        }
        Ok(())
    }

    async fn read_one(&self, command: u16) -> Result<(), ChargerError> {
        let frame = wire::encode_write(self.flavour, command, 0);
        self.bus.send_frame(frame).await?;
        match self.bus.poll_frame(POLL_TIMEOUT).await? {
            Some(frame) => {
                if let Some(decoded) = wire::decode_frame(self.flavour, &frame) {
                    self.apply_decoded(decoded).await;
                }
                self.consecutive_failures.store(0, Ordering::SeqCst);
                Ok(())
            }
            None => self.record_failure().await,
        }
    }

    async fn set_operation(&self, on: bool) -> Result<(), ChargerError> {
        self.write_confirm(cmd::OPERATION, if on { 1 } else { 0 }).await?;
        *self.run_state.write().await = if on { ChargerRunState::Starting } else { ChargerRunState::Stopping };
        Ok(())
    }

    /// Automatic charge algorithm (spec §4.2), run once per `PollInterval`
    /// while the operator has enabled "auto" mode.
    pub async fn automatic_tick(
        &self,
        bms: &BatterySnapshot,
        any_inverter_producing: bool,
        is_day_period: bool,
        soc_start_threshold_pct: f32,
        grid_power_w: f32,
    ) -> Result<(), ChargerError> {
        if self.has_eeprom_fault() {
            return Err(ChargerError::EepromFault);
        }

        let run_state = *self.run_state.read().await;
        let charge_temp_invalid = !bms.charge_temperature_valid;
        let shutdown_off = bms.alarms.over_voltage
            || bms.alarms.over_temperature
            || bms.alarms.under_temperature
            || charge_temp_invalid
            || !is_day_period
            || !bms.charge_enabled
            || !any_inverter_producing;

        if shutdown_off {
            if run_state == ChargerRunState::Running || run_state == ChargerRunState::Starting {
                info!("charger automatic shutdown triggered");
                self.set_operation(false).await?;
            }
            return Ok(());
        }

        match run_state {
            ChargerRunState::Off => {
                let exporting_to_grid = grid_power_w < -self.limits.min_current_a * bms.voltage_v.max(1.0);
                let turn_on = bms.soc_percent < 100.0 && (exporting_to_grid || bms.charge_immediately);
                if turn_on {
                    self.soft_start(bms).await?;
                }
            }
            ChargerRunState::Starting => {
                let st = self.state().await;
                if st.operation_on {
                    *self.run_state.write().await = ChargerRunState::Running;
                }
            }
            ChargerRunState::Running => {
                if bms.charge_immediately && bms.soc_percent < soc_start_threshold_pct - IMMEDIATE_CHARGE_SOC_OFFSET_PCT {
                    info!(soc = bms.soc_percent, "immediate charge active, forcing max current");
                    self.force_max_current().await?;
                } else {
                    self.regulate(bms, grid_power_w).await?;
                }
            }
            ChargerRunState::Stopping => {
                let st = self.state().await;
                if !st.operation_on {
                    *self.run_state.write().await = ChargerRunState::Off;
                }
            }
        }

        Ok(())
    }

    async fn force_max_current(&self) -> Result<(), ChargerError> {
        self.write_confirm(cmd::IOUT_SET, wire::scale_to_raw(self.limits.max_current_a)).await?;
        self.write_confirm(cmd::CURVE_CC, wire::scale_to_raw(self.limits.max_current_a)).await?;
        Ok(())
    }

    async fn soft_start(&self, bms: &BatterySnapshot) -> Result<(), ChargerError> {
        let rec_v = bms.recommended_charge_voltage_v;
        self.write_confirm(cmd::IOUT_SET, wire::scale_to_raw(self.limits.min_current_a)).await?;
        self.write_confirm(cmd::CURVE_CC, wire::scale_to_raw(self.limits.min_current_a)).await?;
        let cv_v = clamp_voltage(self.limits.min_voltage_v, self.limits.max_voltage_v, rec_v - 0.25);
        self.write_confirm(cmd::CURVE_CV, wire::scale_to_raw(cv_v)).await?;
        self.write_confirm(cmd::CURVE_FV, wire::scale_to_raw(clamp_fv_to_cv(rec_v - 0.30, cv_v))).await?;
        self.write_confirm(cmd::VOUT_SET, wire::scale_to_raw(cv_v)).await?;
        self.set_operation(true).await?;
        info!("charger soft-start sequence issued");
        Ok(())
    }

    async fn regulate(&self, bms: &BatterySnapshot, grid_power_w: f32) -> Result<(), ChargerError> {
        let hys = self.hysteresis_a;
        let st = self.state().await;
        let measured_current = st.measured_output_current_a;
        let output_power = st.measured_output_power_w;
        let battery_voltage = bms.voltage_v.max(1.0);

        let action = self.zero_grid_step(grid_power_w, output_power, measured_current, bms.recommended_charge_current_a, battery_voltage, hys);
        match action {
            ZeroGridAction::IncreaseCurrent(new_current) | ZeroGridAction::DecreaseCurrent(new_current) => {
                self.write_confirm(cmd::IOUT_SET, wire::scale_to_raw(new_current)).await?;
                self.write_confirm(cmd::CURVE_CC, wire::scale_to_raw(new_current)).await?;
            }
            ZeroGridAction::Shutdown => {
                info!("zero-grid regulator requests shutdown, turning charger off");
                self.set_operation(false).await?;
            }
            ZeroGridAction::Hold => {}
        }
        Ok(())
    }

    /// Pure zero-grid regulation step (spec §4.2), split out of `regulate`
    /// so it can be unit tested without a live bus.
    pub fn zero_grid_step(
        &self,
        grid_power_w: f32,
        output_power_w: f32,
        measured_current_a: f32,
        recommended_current_a: f32,
        battery_voltage_v: f32,
        hysteresis_a: f32,
    ) -> ZeroGridAction {
        let diff = grid_power_w - output_power_w;
        if diff < -(output_power_w + hysteresis_a) && measured_current_a < recommended_current_a && measured_current_a < self.limits.max_current_a {
            let step = grid_power_w.abs() / battery_voltage_v.max(1.0);
            ZeroGridAction::IncreaseCurrent(clamp_current(self.limits, measured_current_a + step))
        } else if diff > -output_power_w && measured_current_a > 0.0 {
            let step = grid_power_w.abs() / battery_voltage_v.max(1.0);
            let new_current = measured_current_a - step;
            if new_current < self.limits.min_current_a {
                ZeroGridAction::Shutdown
            } else {
                ZeroGridAction::DecreaseCurrent(new_current)
            }
        } else {
            ZeroGridAction::Hold
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZeroGridAction {
    IncreaseCurrent(f32),
    DecreaseCurrent(f32),
    Shutdown,
    Hold,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bms::BmsAlarms;
    use crate::hardware::can::SimulatedCanBus;

    fn engine_with_bus() -> (Arc<SimulatedCanBus>, ChargerEngine) {
        let bus = Arc::new(SimulatedCanBus::new());
        let engine = ChargerEngine::new(bus.clone(), WireFlavour::Psu { device_id: 0 }, ChargerModel::Npb1200_48, 0.2);
        (bus, engine)
    }

    fn ready_bms() -> BatterySnapshot {
        BatterySnapshot {
            voltage_v: 50.0,
            soc_percent: 60.0,
            voltage_age_ms: 0,
            soc_age_ms: 0,
            charge_enabled: true,
            charge_immediately: true,
            recommended_charge_voltage_v: 57.0,
            recommended_charge_current_a: 10.0,
            charge_temperature_valid: true,
            alarms: BmsAlarms::default(),
        }
    }

    #[tokio::test]
    async fn setup_writes_all_registers_and_clears_failures() {
        let (bus, engine) = engine_with_bus();
        // Echo every write back immediately so write_confirm succeeds.
        tokio::spawn({
            let bus = bus.clone();
            async move {
                for _ in 0..8 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    if let Some(sent) = bus.sent_frames().await.last().cloned() {
                        let mut echo = sent;
                        echo.id = wire::PSU_READ_BASE;
                        bus.inject(echo).await;
                    }
                }
            }
        });
        let result = engine.setup().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn two_consecutive_failures_force_off() {
        let (_bus, engine) = engine_with_bus();
        let r1 = engine.write_confirm(cmd::OPERATION, 1).await;
        assert!(r1.is_ok());
        let r2 = engine.write_confirm(cmd::OPERATION, 1).await;
        assert!(matches!(r2, Err(ChargerError::TwoConsecutiveFailures)));
        assert_eq!(engine.run_state().await, ChargerRunState::Off);
    }

    #[tokio::test]
    async fn shutdown_conditions_turn_charger_off() {
        let (_bus, engine) = engine_with_bus();
        *engine.run_state.write().await = ChargerRunState::Running;
        let mut bms = ready_bms();
        bms.alarms.over_voltage = true;
        let _ = engine.automatic_tick(&bms, true, true, 80.0, 0.0).await;
        assert_eq!(engine.run_state().await, ChargerRunState::Stopping);
    }

    #[tokio::test]
    async fn grid_export_turns_charger_on_from_off() {
        let (bus, engine) = engine_with_bus();
        tokio::spawn({
            let bus = bus.clone();
            async move {
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    if let Some(sent) = bus.sent_frames().await.last().cloned() {
                        let mut echo = sent;
                        echo.id = wire::PSU_READ_BASE;
                        bus.inject(echo).await;
                    }
                }
            }
        });
        let mut bms = ready_bms();
        bms.charge_immediately = false;
        let result = engine.automatic_tick(&bms, true, true, 80.0, -200.0).await;
        assert!(result.is_ok());
        assert_eq!(engine.run_state().await, ChargerRunState::Starting);
    }

    #[tokio::test]
    async fn no_export_and_no_immediate_charge_stays_off() {
        let (_bus, engine) = engine_with_bus();
        let mut bms = ready_bms();
        bms.charge_immediately = false;
        let result = engine.automatic_tick(&bms, true, true, 80.0, 0.0).await;
        assert!(result.is_ok());
        assert_eq!(engine.run_state().await, ChargerRunState::Off);
    }

    #[tokio::test]
    async fn immediate_charge_below_threshold_forces_max_current() {
        let (bus, engine) = engine_with_bus();
        tokio::spawn({
            let bus = bus.clone();
            async move {
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    if let Some(sent) = bus.sent_frames().await.last().cloned() {
                        let mut echo = sent;
                        echo.id = wire::PSU_READ_BASE;
                        bus.inject(echo).await;
                    }
                }
            }
        });
        *engine.run_state.write().await = ChargerRunState::Running;
        let mut bms = ready_bms();
        bms.charge_immediately = true;
        bms.soc_percent = 65.0;
        engine.automatic_tick(&bms, true, true, 80.0, 0.0).await.unwrap();
        let limits = model_limits(ChargerModel::Npb1200_48);
        let st = engine.state().await;
        assert_eq!(st.set_output_current_a, limits.max_current_a);
        assert_eq!(st.curve.cc_current_a, limits.max_current_a);
    }

    #[tokio::test]
    async fn soft_start_clamps_cv_setpoint_to_model_voltage_range() {
        let (bus, engine) = engine_with_bus();
        tokio::spawn({
            let bus = bus.clone();
            async move {
                for _ in 0..10 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    if let Some(sent) = bus.sent_frames().await.last().cloned() {
                        let mut echo = sent;
                        echo.id = wire::PSU_READ_BASE;
                        bus.inject(echo).await;
                    }
                }
            }
        });
        let mut bms = ready_bms();
        bms.recommended_charge_voltage_v = 500.0;
        engine.soft_start(&bms).await.unwrap();
        let limits = model_limits(ChargerModel::Npb1200_48);
        let st = engine.state().await;
        assert!(st.set_output_voltage_v <= limits.max_voltage_v);
    }

    #[test]
    fn zero_grid_step_increases_current_on_export() {
        let (_bus, engine) = engine_with_bus();
        let action = engine.zero_grid_step(-200.0, 50.0, 2.0, 10.0, 50.0, 0.2);
        assert!(matches!(action, ZeroGridAction::IncreaseCurrent(_)));
    }

    #[test]
    fn zero_grid_step_shuts_down_below_min_current() {
        let (_bus, engine) = engine_with_bus();
        let action = engine.zero_grid_step(300.0, 50.0, 3.7, 10.0, 50.0, 0.2);
        assert_eq!(action, ZeroGridAction::Shutdown);
    }
}
