#![allow(dead_code)]
//! Grid/house power meter capability surface (spec §6), replacing the
//! teacher's dynamic-inheritance power-meter provider hierarchy with a
//! single trait, per SPEC_FULL.md §9's redesign note.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerMeterSnapshot {
    pub data_valid: bool,
    /// Signed grid power at the point of common coupling: positive is
    /// import from the grid, negative is export to it.
    pub grid_power_w: f32,
    pub house_power_w: f32,
    pub last_update_ms: u32,
}

#[async_trait]
pub trait PowerMeter: Send + Sync {
    async fn is_data_valid(&self) -> bool;
    async fn grid_power_w(&self) -> f32;
    async fn house_power_w(&self) -> f32;
    async fn last_update_ms(&self) -> u32;
}

pub struct SimulatedPowerMeter {
    state: Arc<RwLock<PowerMeterSnapshot>>,
}

impl SimulatedPowerMeter {
    pub fn new() -> Self {
        Self { state: Arc::new(RwLock::new(PowerMeterSnapshot::default())) }
    }

    pub async fn publish(&self, snapshot: PowerMeterSnapshot) {
        *self.state.write().await = snapshot;
    }
}

impl Default for SimulatedPowerMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerMeter for SimulatedPowerMeter {
    async fn is_data_valid(&self) -> bool {
        self.state.read().await.data_valid
    }

    async fn grid_power_w(&self) -> f32 {
        self.state.read().await.grid_power_w
    }

    async fn house_power_w(&self) -> f32 {
        self.state.read().await.house_power_w
    }

    async fn last_update_ms(&self) -> u32 {
        self.state.read().await.last_update_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_invalid_data() {
        let meter = SimulatedPowerMeter::new();
        assert!(!meter.is_data_valid().await);
    }

    #[tokio::test]
    async fn publish_reflects_export_as_negative() {
        let meter = SimulatedPowerMeter::new();
        meter.publish(PowerMeterSnapshot { data_valid: true, grid_power_w: -120.0, house_power_w: 300.0, last_update_ms: 500 }).await;
        assert_eq!(meter.grid_power_w().await, -120.0);
        assert_eq!(meter.house_power_w().await, 300.0);
    }
}
