#![allow(dead_code)]
//! Inverter control surface (spec §6) consumed from a radio transport
//! library external to the DPC. Modelled as a capability trait in the
//! teacher's style (`domain::inverter::Inverter`/`SimulatedInverter`), with
//! the lock-free emergency-stop atomic carried over from the teacher's
//! `SimulatedInverter::emergency_shutdown`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum InverterError {
    #[error("inverter {0} is unreachable")]
    Unreachable(String),
    #[error("inverter {0} rejected the command")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    Ac,
    Dc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelField {
    Pac,
    Uac,
    Iac,
    Pdc,
    Udc,
    Idc,
    Eff,
    F,
}

/// Acknowledgement state for an outstanding command, as reported by
/// `system_config_para` on the radio library (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandAckStatus {
    Ok,
    Pending,
    Failed,
}

/// One MPPT/phase channel's telemetry fields.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub pac_w: f32,
    pub uac_v: f32,
    pub iac_a: f32,
    pub pdc_w: f32,
    pub udc_v: f32,
    pub idc_a: f32,
    pub eff_percent: f32,
    pub frequency_hz: f32,
}

impl ChannelStats {
    pub fn field(&self, field: ChannelField) -> f32 {
        match field {
            ChannelField::Pac => self.pac_w,
            ChannelField::Uac => self.uac_v,
            ChannelField::Iac => self.iac_a,
            ChannelField::Pdc => self.pdc_w,
            ChannelField::Udc => self.udc_v,
            ChannelField::Idc => self.idc_a,
            ChannelField::Eff => self.eff_percent,
            ChannelField::F => self.frequency_hz,
        }
    }
}

/// Snapshot of `stats_last_update_ms()` plus per-channel fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InverterStats {
    pub last_update_ms: u32,
    pub ac_channels: Vec<ChannelStats>,
    pub dc_channels: Vec<ChannelStats>,
}

impl InverterStats {
    pub fn channel_field(&self, ty: ChannelType, channel: usize, field: ChannelField) -> Option<f32> {
        let channels = match ty {
            ChannelType::Ac => &self.ac_channels,
            ChannelType::Dc => &self.dc_channels,
        };
        channels.get(channel).map(|c| c.field(field))
    }

    pub fn total_ac_power_w(&self) -> f32 {
        self.ac_channels.iter().map(|c| c.pac_w).sum()
    }

    pub fn channel_count(&self, ty: ChannelType) -> usize {
        match ty {
            ChannelType::Ac => self.ac_channels.len(),
            ChannelType::Dc => self.dc_channels.len(),
        }
    }
}

/// The inverter control surface the DPC consumes (spec §6).
#[async_trait]
pub trait Inverter: Send + Sync {
    fn serial(&self) -> &str;
    async fn is_reachable(&self) -> bool;
    async fn is_producing(&self) -> bool;
    async fn stats(&self) -> InverterStats;
    async fn max_power_w(&self) -> u32;
    async fn commands_enabled(&self) -> bool;

    async fn last_limit_command_success(&self) -> CommandAckStatus;
    async fn last_limit_command_ts(&self) -> u32;
    async fn limit_percent(&self) -> f32;

    /// Supplemental (not named verbatim in spec §6, but required by §4.3
    /// step 3's "wait until any previous power command has been
    /// acknowledged" — modelled the same way as the limit command ack).
    async fn last_power_command_success(&self) -> CommandAckStatus;
    async fn last_power_command_ts(&self) -> u32;

    async fn send_active_power_control(&self, percent: f32, non_persistent: bool) -> Result<(), InverterError>;
    async fn send_power_control(&self, on: bool) -> Result<(), InverterError>;
    async fn send_restart_control(&self) -> Result<(), InverterError>;

    /// Lock-free emergency stop, mirroring the teacher's atomic-flag pattern
    /// so a hung lock holder never blocks the safety path.
    async fn emergency_shutdown(&self);
}

#[derive(Debug, Clone)]
struct SimulatedInverterInner {
    reachable: bool,
    producing: bool,
    stats: InverterStats,
    max_power_w: u32,
    commands_enabled: bool,
    limit_percent: f32,
    limit_ack: CommandAckStatus,
    limit_ack_ts: u32,
    power_ack: CommandAckStatus,
    power_ack_ts: u32,
    clock_ms: u32,
}

/// In-memory inverter used by every test and local development run, the
/// same role the teacher's `SimulatedInverter` plays.
pub struct SimulatedInverter {
    serial: String,
    inner: Arc<RwLock<SimulatedInverterInner>>,
    clock_ms: Arc<AtomicU32>,
    emergency_stop: Arc<AtomicBool>,
}

impl SimulatedInverter {
    pub fn new(serial: impl Into<String>, max_power_w: u32) -> Self {
        Self {
            serial: serial.into(),
            inner: Arc::new(RwLock::new(SimulatedInverterInner {
                reachable: true,
                producing: false,
                stats: InverterStats::default(),
                max_power_w,
                commands_enabled: true,
                limit_percent: 100.0,
                limit_ack: CommandAckStatus::Ok,
                limit_ack_ts: 0,
                power_ack: CommandAckStatus::Ok,
                power_ack_ts: 0,
                clock_ms: 0,
            })),
            clock_ms: Arc::new(AtomicU32::new(0)),
            emergency_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Test hook: publish a fresh telemetry snapshot and advance the
    /// device's notion of "now", as the radio library's RX thread would.
    pub async fn publish_stats(&self, now_ms: u32, ac_power_w: f32, producing: bool) {
        let mut st = self.inner.write().await;
        st.stats.last_update_ms = now_ms;
        if st.stats.ac_channels.is_empty() {
            st.stats.ac_channels.push(ChannelStats::default());
        }
        st.stats.ac_channels[0].pac_w = ac_power_w;
        st.producing = producing;
        st.clock_ms = now_ms;
        self.clock_ms.store(now_ms, Ordering::SeqCst);
    }

    pub async fn set_reachable(&self, reachable: bool) {
        self.inner.write().await.reachable = reachable;
    }

    pub async fn set_commands_enabled(&self, enabled: bool) {
        self.inner.write().await.commands_enabled = enabled;
    }

    /// Test hook: acknowledge the outstanding limit command.
    pub async fn ack_limit(&self, ts: u32, percent: f32, status: CommandAckStatus) {
        let mut st = self.inner.write().await;
        st.limit_ack = status;
        st.limit_ack_ts = ts;
        st.limit_percent = percent;
    }

    pub async fn ack_power(&self, ts: u32, status: CommandAckStatus) {
        let mut st = self.inner.write().await;
        st.power_ack = status;
        st.power_ack_ts = ts;
    }
}

#[async_trait]
impl Inverter for SimulatedInverter {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn is_reachable(&self) -> bool {
        !self.emergency_stop.load(Ordering::SeqCst) && self.inner.read().await.reachable
    }

    async fn is_producing(&self) -> bool {
        self.inner.read().await.producing
    }

    async fn stats(&self) -> InverterStats {
        self.inner.read().await.stats.clone()
    }

    async fn max_power_w(&self) -> u32 {
        self.inner.read().await.max_power_w
    }

    async fn commands_enabled(&self) -> bool {
        self.inner.read().await.commands_enabled
    }

    async fn last_limit_command_success(&self) -> CommandAckStatus {
        self.inner.read().await.limit_ack
    }

    async fn last_limit_command_ts(&self) -> u32 {
        self.inner.read().await.limit_ack_ts
    }

    async fn limit_percent(&self) -> f32 {
        self.inner.read().await.limit_percent
    }

    async fn last_power_command_success(&self) -> CommandAckStatus {
        self.inner.read().await.power_ack
    }

    async fn last_power_command_ts(&self) -> u32 {
        self.inner.read().await.power_ack_ts
    }

    async fn send_active_power_control(&self, percent: f32, _non_persistent: bool) -> Result<(), InverterError> {
        if self.emergency_stop.load(Ordering::SeqCst) {
            return Err(InverterError::Rejected(self.serial.clone()));
        }
        let mut st = self.inner.write().await;
        if !st.reachable {
            return Err(InverterError::Unreachable(self.serial.clone()));
        }
        st.limit_ack = CommandAckStatus::Pending;
        let _ = percent;
        Ok(())
    }

    async fn send_power_control(&self, _on: bool) -> Result<(), InverterError> {
        if self.emergency_stop.load(Ordering::SeqCst) {
            return Err(InverterError::Rejected(self.serial.clone()));
        }
        let mut st = self.inner.write().await;
        if !st.reachable {
            return Err(InverterError::Unreachable(self.serial.clone()));
        }
        st.power_ack = CommandAckStatus::Pending;
        Ok(())
    }

    async fn send_restart_control(&self) -> Result<(), InverterError> {
        if !self.inner.read().await.reachable {
            return Err(InverterError::Unreachable(self.serial.clone()));
        }
        Ok(())
    }

    async fn emergency_shutdown(&self) {
        self.emergency_stop.store(true, Ordering::SeqCst);
        if let Ok(mut st) = self.inner.try_write() {
            st.producing = false;
        } else {
            tracing::warn!(serial = %self.serial, "emergency shutdown: state lock busy, relying on atomic flag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_inverter_starts_reachable_and_idle() {
        let inv = SimulatedInverter::new("116491234567", 800);
        assert!(inv.is_reachable().await);
        assert!(!inv.is_producing().await);
        assert_eq!(inv.max_power_w().await, 800);
    }

    #[tokio::test]
    async fn limit_command_moves_to_pending_then_acks() {
        let inv = SimulatedInverter::new("serial", 800);
        inv.send_active_power_control(50.0, false).await.unwrap();
        assert_eq!(inv.last_limit_command_success().await, CommandAckStatus::Pending);
        inv.ack_limit(1000, 50.0, CommandAckStatus::Ok).await;
        assert_eq!(inv.last_limit_command_success().await, CommandAckStatus::Ok);
        assert_eq!(inv.limit_percent().await, 50.0);
    }

    #[tokio::test]
    async fn emergency_shutdown_rejects_further_commands() {
        let inv = SimulatedInverter::new("serial", 800);
        inv.emergency_shutdown().await;
        assert!(inv.send_power_control(true).await.is_err());
        assert!(!inv.is_reachable().await);
    }
}
