#![allow(dead_code)]
//! Solar charge controller (MPPT) capability surface (spec §6). Used by the
//! threshold/limiter components to tell "no sun" apart from "sensor stale".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MpptSnapshot {
    pub data_valid: bool,
    pub output_voltage_v: f32,
    pub output_power_w: f32,
    pub last_update_ms: u32,
}

#[async_trait]
pub trait Mppt: Send + Sync {
    async fn is_data_valid(&self) -> bool;
    async fn output_voltage_v(&self) -> f32;
    async fn output_power_w(&self) -> f32;
    async fn last_update_ms(&self) -> u32;
}

pub struct SimulatedMppt {
    state: Arc<RwLock<MpptSnapshot>>,
}

impl SimulatedMppt {
    pub fn new() -> Self {
        Self { state: Arc::new(RwLock::new(MpptSnapshot::default())) }
    }

    pub async fn publish(&self, snapshot: MpptSnapshot) {
        *self.state.write().await = snapshot;
    }
}

impl Default for SimulatedMppt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mppt for SimulatedMppt {
    async fn is_data_valid(&self) -> bool {
        self.state.read().await.data_valid
    }

    async fn output_voltage_v(&self) -> f32 {
        self.state.read().await.output_voltage_v
    }

    async fn output_power_w(&self) -> f32 {
        self.state.read().await.output_power_w
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
        let mppt = SimulatedMppt::new();
        assert!(!mppt.is_data_valid().await);
        assert_eq!(mppt.output_power_w().await, 0.0);
    }

    #[tokio::test]
    async fn publish_updates_snapshot() {
        let mppt = SimulatedMppt::new();
        mppt.publish(MpptSnapshot { data_valid: true, output_voltage_v: 48.3, output_power_w: 210.0, last_update_ms: 1000 }).await;
        assert!(mppt.is_data_valid().await);
        assert_eq!(mppt.output_power_w().await, 210.0);
    }
}
