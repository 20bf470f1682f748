#![allow(dead_code)]
//! Battery management system capability surface (spec §3 `BatterySnapshot`,
//! §6 "BMS surface"). The DPC never owns a battery; it only reads whatever
//! the BMS driver last published. Styled after the teacher's
//! `domain::battery::Battery` trait and `SimulatedBattery`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Alarm bits carried on the BMS snapshot (spec §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmsAlarms {
    pub over_voltage: bool,
    pub over_temperature: bool,
    pub under_temperature: bool,
    pub over_current_charge: bool,
}

impl BmsAlarms {
    pub fn any(&self) -> bool {
        self.over_voltage || self.over_temperature || self.under_temperature || self.over_current_charge
    }
}

/// Immutable view of the last BMS telemetry frame (spec §3 `BatterySnapshot`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    pub voltage_v: f32,
    pub soc_percent: f32,
    pub voltage_age_ms: u32,
    pub soc_age_ms: u32,
    pub charge_enabled: bool,
    pub charge_immediately: bool,
    pub recommended_charge_voltage_v: f32,
    pub recommended_charge_current_a: f32,
    pub charge_temperature_valid: bool,
    pub alarms: BmsAlarms,
}

impl BatterySnapshot {
    pub fn uninitialized() -> Self {
        Self {
            voltage_v: 0.0,
            soc_percent: 0.0,
            voltage_age_ms: u32::MAX,
            soc_age_ms: u32::MAX,
            charge_enabled: false,
            charge_immediately: false,
            recommended_charge_voltage_v: 0.0,
            recommended_charge_current_a: 0.0,
            charge_temperature_valid: false,
            alarms: BmsAlarms::default(),
        }
    }
}

/// The BMS capability the DPC reads from (spec §6).
#[async_trait]
pub trait Bms: Send + Sync {
    async fn snapshot(&self) -> BatterySnapshot;
    async fn is_initialized(&self) -> bool;
}

/// In-memory BMS, fed by test code the way a CAN/VE.Direct driver thread
/// would feed the real one.
pub struct SimulatedBms {
    state: Arc<RwLock<BatterySnapshot>>,
    initialized: Arc<RwLock<bool>>,
}

impl SimulatedBms {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BatterySnapshot::uninitialized())),
            initialized: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn publish(&self, snapshot: BatterySnapshot) {
        *self.state.write().await = snapshot;
        *self.initialized.write().await = true;
    }
}

impl Default for SimulatedBms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bms for SimulatedBms {
    async fn snapshot(&self) -> BatterySnapshot {
        *self.state.read().await
    }

    async fn is_initialized(&self) -> bool {
        *self.initialized.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uninitialized_bms_reports_not_initialized() {
        let bms = SimulatedBms::new();
        assert!(!bms.is_initialized().await);
        assert_eq!(bms.snapshot().await.soc_age_ms, u32::MAX);
    }

    #[tokio::test]
    async fn publish_marks_initialized_and_updates_snapshot() {
        let bms = SimulatedBms::new();
        let mut snap = BatterySnapshot::uninitialized();
        snap.soc_percent = 72.0;
        snap.voltage_v = 52.4;
        bms.publish(snap).await;
        assert!(bms.is_initialized().await);
        assert_eq!(bms.snapshot().await.soc_percent, 72.0);
    }

    #[test]
    fn alarms_any_is_false_when_clear() {
        assert!(!BmsAlarms::default().any());
    }
}
