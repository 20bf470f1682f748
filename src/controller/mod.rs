#![allow(dead_code)]
//! Root aggregate (spec §3 "Root aggregate"): owns every component and
//! drives one pass of the control pipeline per tick. Mirrors the teacher's
//! `AppState`/`BatteryController` split, minus the web/database/forecast
//! wiring this system has no use for.

pub mod safety;

use std::sync::Arc;

use anyhow::Result;
use chrono::Timelike;
use tracing::{info, warn};

use crate::aggregator;
use crate::charger::wire::WireFlavour;
use crate::charger::{ChargerEngine, ChargerModel};
use crate::config::DpcConfig;
use crate::dc_switch::{DcSwitchSequencer, SimulatedGpio};
use crate::domain::bms::{Bms, SimulatedBms};
use crate::domain::inverter::{Inverter, SimulatedInverter};
use crate::domain::meter::{PowerMeter, PowerMeterSnapshot, SimulatedPowerMeter};
use crate::domain::mppt::{Mppt, MpptSnapshot, SimulatedMppt};
use crate::domain::types::OperatorMode;
use crate::hardware::factory::BusFactory;
use crate::inverter_coord::InverterCoordinator;
use crate::power_limiter::{LimiterConfig, PowerLimiter, TickInputs};
use crate::threshold::{ThresholdConfig, ThresholdLogic, ThresholdState};
use crate::zero_export::{ZeroExportConfig, ZeroExportController};
use safety::{SafetyConfig, SafetyMonitor};

async fn mppt_snapshot(mppt: &dyn Mppt) -> MpptSnapshot {
    MpptSnapshot {
        data_valid: mppt.is_data_valid().await,
        output_voltage_v: mppt.output_voltage_v().await,
        output_power_w: mppt.output_power_w().await,
        last_update_ms: mppt.last_update_ms().await,
    }
}

async fn meter_snapshot(meter: &dyn PowerMeter) -> PowerMeterSnapshot {
    PowerMeterSnapshot {
        data_valid: meter.is_data_valid().await,
        grid_power_w: meter.grid_power_w().await,
        house_power_w: meter.house_power_w().await,
        last_update_ms: meter.last_update_ms().await,
    }
}

/// Owns every DPC component and advances them together one tick at a time.
pub struct Controller {
    config: DpcConfig,
    charger: ChargerEngine,
    coordinator: Arc<InverterCoordinator>,
    inverter: Arc<dyn Inverter>,
    bms: Arc<dyn Bms>,
    mppt: Arc<dyn Mppt>,
    meter: Arc<dyn PowerMeter>,
    dc_switch: DcSwitchSequencer,
    threshold: ThresholdLogic,
    threshold_state: tokio::sync::RwLock<ThresholdState>,
    limiter: PowerLimiter,
    zero_export: ZeroExportController,
    safety: tokio::sync::RwLock<SafetyMonitor>,
    operator_mode: tokio::sync::RwLock<OperatorMode>,
    last_commanded_limit_w: tokio::sync::RwLock<Option<u32>>,
}

impl Controller {
    pub async fn new(config: DpcConfig, factory: &BusFactory) -> Self {
        let can_bus = factory.create_can_bus();
        let model = ChargerModel::parse(&config.charger.model).unwrap_or(ChargerModel::Npb1200_48);
        let flavour = match config.charger.psu_device_id {
            Some(id) => WireFlavour::Psu { device_id: id },
            None => WireFlavour::TelecomRectifier,
        };
        let charger = ChargerEngine::new(can_bus, flavour, model, config.charger.current_hysteresis_a);
        if let Err(e) = charger.setup().await {
            warn!(error = %e, "charger setup sequence did not complete cleanly, continuing with defaults");
        }

        let inverter: Arc<dyn Inverter> = Arc::new(SimulatedInverter::new(config.limiter.primary_inverter_serial.clone(), config.limiter.upper_limit_w));
        let coordinator = Arc::new(InverterCoordinator::new());
        coordinator.register(config.limiter.primary_inverter_serial.clone(), inverter.clone()).await;

        let gpio = Arc::new(SimulatedGpio::new());
        let dc_switch = DcSwitchSequencer::new(gpio, config.limiter.primary_inverter_serial.clone());

        let threshold = ThresholdLogic::new(ThresholdConfig {
            soc_start_pct: config.threshold.soc_start_pct,
            soc_stop_pct: config.threshold.soc_stop_pct,
            voltage_start_v: config.threshold.voltage_start_v,
            voltage_stop_v: config.threshold.voltage_stop_v,
            fsp_entry_pct: config.threshold.fsp_entry_pct,
            fsp_exit_pct: config.threshold.fsp_exit_pct,
            night_use_enabled: config.threshold.night_use_enabled,
        });

        let limiter = PowerLimiter::new(LimiterConfig {
            lower_limit_w: config.limiter.lower_limit_w,
            upper_limit_w: config.limiter.upper_limit_w,
            hysteresis_w: config.limiter.hysteresis_w,
            target_consumption_w: config.limiter.target_consumption_w,
            meter_includes_inverter: config.limiter.meter_includes_inverter,
            solar_powered: config.general.solar_powered,
            base_load_fallback_w: config.limiter.base_load_fallback_w,
            passthrough_losses_pct: config.limiter.passthrough_losses_pct,
            restart_hour: config.limiter.restart_hour,
        });

        let zero_export = ZeroExportController::new(ZeroExportConfig {
            max_grid_w: config.zero_export.max_grid_w,
            minimum_limit_pct: config.zero_export.minimum_limit_pct,
            power_hysteresis_w: config.zero_export.power_hysteresis_w,
            tn_seconds: config.zero_export.tn_seconds,
            selected_serials: config.zero_export.selected_serials.clone(),
        });

        Self {
            config,
            charger,
            coordinator,
            inverter,
            bms: Arc::new(SimulatedBms::new()),
            mppt: Arc::new(SimulatedMppt::new()),
            meter: Arc::new(SimulatedPowerMeter::new()),
            dc_switch,
            threshold,
            threshold_state: tokio::sync::RwLock::new(ThresholdState::default()),
            limiter,
            zero_export,
            safety: tokio::sync::RwLock::new(SafetyMonitor::new(SafetyConfig::default())),
            operator_mode: tokio::sync::RwLock::new(OperatorMode::Normal),
            last_commanded_limit_w: tokio::sync::RwLock::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<InverterCoordinator> {
        &self.coordinator
    }

    pub async fn set_operator_mode(&self, mode: OperatorMode) {
        *self.operator_mode.write().await = mode;
    }

    pub fn bms_handle(&self) -> Arc<dyn Bms> {
        self.bms.clone()
    }

    /// One full pass through the control pipeline: poll the charger, fold
    /// fresh telemetry into the safety monitor and threshold logic, drive
    /// the DC switch sequencer, then hand the result to the power limiter
    /// (and, if enabled, the Zero-Export controller) before advancing the
    /// inverter command coordinator.
    pub async fn tick(&self, now_ms: u32) -> Result<()> {
        if let Err(e) = self.charger.poll_tick().await {
            warn!(error = %e, "charger poll tick failed");
        }

        let bms_snapshot = self.bms.snapshot().await;
        let mppt_snap = mppt_snapshot(self.mppt.as_ref()).await;
        let meter_snap = meter_snapshot(self.meter.as_ref()).await;
        let inverter_stats = self.inverter.stats().await;

        {
            let mut safety = self.safety.write().await;
            safety.check_battery(&bms_snapshot.alarms, bms_snapshot.voltage_v);
            safety.check_charger(self.charger.has_eeprom_fault());
        }

        if self.safety.read().await.is_emergency() {
            warn!("emergency latched, forcing inverter and DC switch off");
            let _ = self.coordinator.request(self.inverter.serial(), now_ms, Some(false), None).await;
            self.dc_switch.request_disconnect(now_ms, &self.coordinator).await;
            let _ = self.coordinator.tick(self.inverter.serial(), now_ms).await;
            return Ok(());
        }

        let battery_voltage = aggregator::battery_voltage(&bms_snapshot, &mppt_snap, None);
        let trusted_soc = aggregator::trusted_soc_percent(&bms_snapshot);
        let ac_power = aggregator::total_ac_power_w(&inverter_stats);
        let load_corrected_voltage = battery_voltage.map(|v| aggregator::load_corrected_voltage(v, ac_power, 0.0)).unwrap_or(0.0);

        let mut threshold_state = self.threshold_state.write().await;
        self.threshold.update_discharge_permission(&mut threshold_state, trusted_soc, load_corrected_voltage);
        self.threshold.update_fsp_latch(&mut threshold_state, trusted_soc, load_corrected_voltage);
        let start_reached = self.threshold.start_reached(trusted_soc, load_corrected_voltage);
        let operator_mode = *self.operator_mode.read().await;
        let battery_power_allowed = self.threshold.discharge_permitted(&threshold_state, mppt_snap.output_power_w, bms_snapshot.alarms.any(), operator_mode);
        let fsp_latched = threshold_state.fsp_latched;
        drop(threshold_state);

        self.dc_switch.tick(now_ms, &self.coordinator, start_reached).await;

        let is_day_period = mppt_snap.output_power_w > 0.0 || mppt_snap.data_valid;
        if let Err(e) = self
            .charger
            .automatic_tick(&bms_snapshot, self.inverter.is_producing().await, is_day_period, self.config.threshold.soc_start_pct, meter_snap.grid_power_w)
            .await
        {
            warn!(error = %e, "charger automatic tick failed");
        }

        let inputs = TickInputs {
            now_ms,
            wall_clock_present: true,
            mode: operator_mode,
            battery_initialized: self.bms.is_initialized().await,
            discharge_temperature_valid: bms_snapshot.charge_temperature_valid,
            inverter_settled: self.dc_switch.is_connected().await,
            inverter_reachable: self.inverter.is_reachable().await,
            inverter_commands_enabled: self.inverter.commands_enabled().await,
            inverter_max_power_w: self.inverter.max_power_w().await,
            inverter_stats_fresh: inverter_stats.last_update_ms != 0,
            meter_valid: meter_snap.data_valid,
            meter_fresh: meter_snap.data_valid,
            meter_reading_w: meter_snap.grid_power_w,
            inverter_output_w: ac_power,
            inverter_producing: self.inverter.is_producing().await,
            inverter_reported_efficiency: None,
            battery_power_allowed,
            mppt_output_w: mppt_snap.output_power_w,
            fsp_latched,
            charger_running: matches!(self.charger.run_state().await, crate::domain::types::ChargerRunState::Running | crate::domain::types::ChargerRunState::Starting),
            channel_ac_powers_w: inverter_stats.ac_channels.iter().map(|c| c.pac_w).collect(),
            last_commanded_limit_w: *self.last_commanded_limit_w.read().await,
        };

        let decision = self.limiter.evaluate(&inputs).await;
        info!(status = %decision.status, limit_w = ?decision.new_limit_w, shutdown = decision.shutdown, "power limiter decision");
        if decision.shutdown {
            *self.last_commanded_limit_w.write().await = None;
            self.coordinator.request(self.inverter.serial(), now_ms, Some(false), None).await.ok();
        } else if let Some(limit_w) = decision.new_limit_w {
            *self.last_commanded_limit_w.write().await = Some(limit_w);
            self.coordinator.request(self.inverter.serial(), now_ms, Some(true), Some(limit_w)).await.ok();
        }

        if self.config.zero_export.enabled {
            if let Some(serial) = self.zero_export.next_serial() {
                let total_max_power = self.inverter.max_power_w().await as f32;
                let ze_decision = self.zero_export.tick(meter_snap.grid_power_w, total_max_power, now_ms).await;
                if ze_decision.changed {
                    let watts = (ze_decision.limit_pct / 100.0 * total_max_power as f64) as u32;
                    self.coordinator.request(serial, now_ms, None, Some(watts)).await.ok();
                }
            }
        }

        self.coordinator.tick(self.inverter.serial(), now_ms).await.ok();
        Ok(())
    }

    /// Computes milliseconds until the configured daily restart hour, if any
    /// (spec §4.8 "periodic restart scheduling").
    pub fn ms_until_restart(&self, now: chrono::DateTime<chrono::Utc>) -> Option<u32> {
        self.limiter.ms_until_restart_hour(now.hour() as u8, now.minute() as u8, now.second() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_controller_ticks_without_panicking() {
        let factory = BusFactory::simulated();
        let controller = Controller::new(DpcConfig::default(), &factory).await;
        let result = controller.tick(0).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn repeated_ticks_advance_without_error() {
        let factory = BusFactory::simulated();
        let controller = Controller::new(DpcConfig::default(), &factory).await;
        for t in (0..5_000).step_by(1_000) {
            assert!(controller.tick(t).await.is_ok());
        }
    }

    #[tokio::test]
    async fn unconditional_passthrough_mode_is_observed() {
        let factory = BusFactory::simulated();
        let controller = Controller::new(DpcConfig::default(), &factory).await;
        controller.set_operator_mode(OperatorMode::UnconditionalFullSolarPassthrough).await;
        assert!(controller.tick(0).await.is_ok());
    }
}
