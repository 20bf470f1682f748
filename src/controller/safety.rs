#![allow(dead_code)]
//! Safety monitor: reconciles the battery's own alarm bits, the charger's
//! EEPROM fault line and an inverter's emergency-stop latch into a single
//! process-wide `Arc<AtomicBool>` emergency flag, mirroring the lock-free
//! emergency-shutdown pattern already used by
//! [`crate::domain::inverter::SimulatedInverter`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::bms::BmsAlarms;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SafetyEvent {
    BatteryOverVoltage { voltage_v: f32, limit_v: f32 },
    BatteryOverTemperature,
    BatteryUnderTemperature,
    BatteryOverCurrentCharge,
    ChargerEepromFault,
    InverterEmergencyStop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub battery_over_voltage_limit_v: f32,
    pub max_event_history: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self { battery_over_voltage_limit_v: 58.4, max_event_history: 100 }
    }
}

pub struct SafetyMonitor {
    config: SafetyConfig,
    events: VecDeque<(DateTime<Utc>, SafetyEvent)>,
    emergency: Arc<AtomicBool>,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config, events: VecDeque::new(), emergency: Arc::new(AtomicBool::new(false)) }
    }

    /// Shared flag other components can poll without locking the monitor.
    pub fn emergency_flag(&self) -> Arc<AtomicBool> {
        self.emergency.clone()
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::Relaxed)
    }

    fn raise(&mut self, event: SafetyEvent) {
        error!(?event, "safety condition raised, latching emergency stop");
        self.emergency.store(true, Ordering::Relaxed);
        if self.events.len() >= self.config.max_event_history {
            self.events.pop_front();
        }
        self.events.push_back((Utc::now(), event));
    }

    /// Evaluates BMS-reported alarm bits and pack voltage against the
    /// configured ceiling.
    pub fn check_battery(&mut self, alarms: &BmsAlarms, voltage_v: f32) {
        if voltage_v > self.config.battery_over_voltage_limit_v {
            self.raise(SafetyEvent::BatteryOverVoltage { voltage_v, limit_v: self.config.battery_over_voltage_limit_v });
        }
        if alarms.over_temperature {
            self.raise(SafetyEvent::BatteryOverTemperature);
        }
        if alarms.under_temperature {
            self.raise(SafetyEvent::BatteryUnderTemperature);
        }
        if alarms.over_current_charge {
            self.raise(SafetyEvent::BatteryOverCurrentCharge);
        }
    }

    pub fn check_charger(&mut self, eeprom_fault: bool) {
        if eeprom_fault {
            self.raise(SafetyEvent::ChargerEepromFault);
        }
    }

    pub fn record_inverter_emergency_stop(&mut self) {
        self.raise(SafetyEvent::InverterEmergencyStop);
    }

    /// Operator-initiated reset after the underlying condition has cleared.
    pub fn clear(&mut self) {
        warn!("safety monitor emergency flag cleared by operator");
        self.emergency.store(false, Ordering::Relaxed);
    }

    pub fn recent_events(&self) -> &VecDeque<(DateTime<Utc>, SafetyEvent)> {
        &self.events
    }
}

impl Default for SafetyMonitor {
    fn default() -> Self {
        Self::new(SafetyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_voltage_latches_emergency() {
        let mut monitor = SafetyMonitor::default();
        assert!(!monitor.is_emergency());
        monitor.check_battery(&BmsAlarms::default(), 60.0);
        assert!(monitor.is_emergency());
    }

    #[test]
    fn eeprom_fault_latches_emergency() {
        let mut monitor = SafetyMonitor::default();
        monitor.check_charger(true);
        assert!(monitor.is_emergency());
    }

    #[test]
    fn clear_resets_the_flag() {
        let mut monitor = SafetyMonitor::default();
        monitor.record_inverter_emergency_stop();
        assert!(monitor.is_emergency());
        monitor.clear();
        assert!(!monitor.is_emergency());
    }

    #[test]
    fn nominal_readings_never_raise() {
        let mut monitor = SafetyMonitor::default();
        monitor.check_battery(&BmsAlarms::default(), 54.0);
        monitor.check_charger(false);
        assert!(!monitor.is_emergency());
        assert!(monitor.recent_events().is_empty());
    }
}
