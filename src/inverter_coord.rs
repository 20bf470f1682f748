#![allow(dead_code)]
//! Inverter command coordinator (Component C, spec §4.3). Drives each known
//! inverter toward a requested (on/off, limit) without reentrancy, without
//! racing the inverter's own telemetry, and with bounded recovery. Keyed by
//! inverter serial, grounded on `ZeroExport.h`'s `INV_MAX_COUNT`/selected-
//! serials pattern and the teacher's `Arc<RwLock<_>>` snapshot idiom.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::inverter::{CommandAckStatus, Inverter};
use crate::domain::types::InverterCommandTicket;
use crate::time_utils::is_newer_or_equal;

const TICKET_TIMEOUT_MS: u32 = 30_000;
const RESTART_AFTER_TIMEOUTS: u32 = 10;
const PROCESS_RESTART_AFTER_TIMEOUTS: u32 = 20;
const LIMIT_DEVIATION_TOLERANCE_PCT: f32 = 2.0;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("coordinator timed out waiting for inverter {0} to acknowledge")]
    Timeout(String),
    #[error("reported limit deviates more than tolerance for inverter {0}")]
    DeviationExceeded(String),
    #[error("no such inverter serial configured: {0}")]
    NoSuchSerial(String),
}

struct Slot {
    inverter: Arc<dyn Inverter>,
    ticket: InverterCommandTicket,
}

/// True when `deadline_ms` has elapsed since `opened_at_ms`, on the
/// millis() ring (spec §4.3's wrap-aware freshness rule).
fn timed_out(now_ms: u32, opened_at_ms: u32, deadline_ms: u32) -> bool {
    is_newer_or_equal(now_ms, opened_at_ms.wrapping_add(deadline_ms))
}

pub struct InverterCoordinator {
    slots: RwLock<HashMap<String, Slot>>,
}

impl InverterCoordinator {
    pub fn new() -> Self {
        Self { slots: RwLock::new(HashMap::new()) }
    }

    pub async fn register(&self, serial: impl Into<String>, inverter: Arc<dyn Inverter>) {
        self.slots.write().await.insert(serial.into(), Slot { inverter, ticket: InverterCommandTicket::default() });
    }

    pub async fn request(&self, serial: &str, now_ms: u32, desired_on: Option<bool>, desired_limit_w: Option<u32>) -> Result<(), CoordError> {
        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(serial).ok_or_else(|| CoordError::NoSuchSerial(serial.to_string()))?;
        slot.ticket.desired_on = desired_on.or(slot.ticket.desired_on);
        slot.ticket.desired_limit_w = desired_limit_w.or(slot.ticket.desired_limit_w);
        if slot.ticket.opened_at_ms == 0 {
            slot.ticket.opened_at_ms = now_ms;
        }
        Ok(())
    }

    pub async fn clear(&self, serial: &str) {
        if let Some(slot) = self.slots.write().await.get_mut(serial) {
            slot.ticket = InverterCommandTicket::default();
        }
    }

    /// One coordinator tick for a single inverter; `true` while the desired
    /// state has not yet been observed (spec §4.3 per-tick algorithm).
    pub async fn tick(&self, serial: &str, now_ms: u32) -> Result<bool, CoordError> {
        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(serial).ok_or_else(|| CoordError::NoSuchSerial(serial.to_string()))?;

        if slot.ticket.is_empty() {
            slot.ticket.timeout_count = 0;
            return Ok(false);
        }

        if timed_out(now_ms, slot.ticket.opened_at_ms, TICKET_TIMEOUT_MS) {
            slot.ticket.timeout_count += 1;
            let count = slot.ticket.timeout_count;
            slot.ticket.opened_at_ms = now_ms;
            warn!(serial, count, "inverter command ticket timed out");
            if count == RESTART_AFTER_TIMEOUTS {
                let _ = slot.inverter.send_restart_control().await;
                info!(serial, "issuing inverter restart after repeated timeouts");
            }
            if count >= PROCESS_RESTART_AFTER_TIMEOUTS {
                warn!(serial, "requesting process restart after repeated inverter timeouts");
                return Err(CoordError::Timeout(serial.to_string()));
            }
            return Ok(true);
        }

        // Off-before-limit-before-on ordering.
        if slot.ticket.desired_on == Some(false) {
            return Self::drive_off(slot, now_ms).await;
        }
        if let Some(target_limit) = slot.ticket.desired_limit_w {
            let done = Self::drive_limit(slot, target_limit, now_ms).await?;
            if !done {
                return Ok(true);
            }
        }
        if slot.ticket.desired_on == Some(true) {
            return Self::drive_on(slot, now_ms).await;
        }

        Ok(false)
    }

    async fn drive_off(slot: &mut Slot, now_ms: u32) -> Result<bool, CoordError> {
        if slot.inverter.last_power_command_success().await == CommandAckStatus::Pending {
            return Ok(true);
        }
        let stats_fresh = is_newer_or_equal(slot.inverter.stats().await.last_update_ms, slot.inverter.last_power_command_ts().await);
        if stats_fresh && !slot.inverter.is_producing().await {
            slot.ticket.desired_on = None;
            return Ok(!slot.ticket.is_empty());
        }
        let _ = slot.inverter.send_power_control(false).await;
        let _ = now_ms;
        Ok(true)
    }

    async fn drive_on(slot: &mut Slot, now_ms: u32) -> Result<bool, CoordError> {
        if slot.inverter.last_power_command_success().await == CommandAckStatus::Pending {
            return Ok(true);
        }
        let stats_fresh = is_newer_or_equal(slot.inverter.stats().await.last_update_ms, slot.inverter.last_power_command_ts().await);
        if stats_fresh && slot.inverter.is_producing().await {
            slot.ticket.desired_on = None;
            return Ok(!slot.ticket.is_empty());
        }
        let _ = slot.inverter.send_power_control(true).await;
        let _ = now_ms;
        Ok(true)
    }

    async fn drive_limit(slot: &mut Slot, target_limit_w: u32, _now_ms: u32) -> Result<bool, CoordError> {
        match slot.inverter.last_limit_command_success().await {
            CommandAckStatus::Pending => Ok(false),
            CommandAckStatus::Failed => {
                let max_power = slot.inverter.max_power_w().await.max(1);
                let percent = (target_limit_w as f32 / max_power as f32 * 100.0).clamp(0.0, 100.0);
                let _ = slot.inverter.send_active_power_control(percent, false).await;
                Ok(false)
            }
            CommandAckStatus::Ok => {
                let max_power = slot.inverter.max_power_w().await.max(1);
                let reported_w = slot.inverter.limit_percent().await / 100.0 * max_power as f32;
                let deviation_pct = ((reported_w - target_limit_w as f32).abs() / target_limit_w.max(1) as f32) * 100.0;
                if deviation_pct > LIMIT_DEVIATION_TOLERANCE_PCT {
                    warn!(serial = slot.inverter.serial(), deviation_pct, "reported limit deviates from requested limit");
                }
                slot.ticket.desired_limit_w = None;
                Ok(true)
            }
        }
    }
}

impl Default for InverterCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inverter::SimulatedInverter;

    #[tokio::test]
    async fn idle_coordinator_resets_and_returns_false() {
        let coord = InverterCoordinator::new();
        coord.register("S1", Arc::new(SimulatedInverter::new("S1", 800))).await;
        let pending = coord.tick("S1", 1000).await.unwrap();
        assert!(!pending);
    }

    #[tokio::test]
    async fn limit_request_clears_once_acknowledged() {
        let coord = InverterCoordinator::new();
        let inv = Arc::new(SimulatedInverter::new("S1", 800));
        coord.register("S1", inv.clone()).await;
        coord.request("S1", 0, None, Some(400)).await.unwrap();

        let pending = coord.tick("S1", 10).await.unwrap();
        assert!(pending);

        inv.ack_limit(20, 50.0, CommandAckStatus::Ok).await;
        let pending = coord.tick("S1", 30).await.unwrap();
        assert!(!pending);
    }

    #[tokio::test]
    async fn unknown_serial_is_rejected() {
        let coord = InverterCoordinator::new();
        let result = coord.request("ghost", 0, Some(true), None).await;
        assert!(matches!(result, Err(CoordError::NoSuchSerial(_))));
    }

    #[tokio::test]
    async fn ticket_timeout_increments_counter() {
        let coord = InverterCoordinator::new();
        let inv = Arc::new(SimulatedInverter::new("S1", 800));
        inv.set_reachable(false).await;
        coord.register("S1", inv).await;
        coord.request("S1", 0, Some(true), None).await.unwrap();
        let pending = coord.tick("S1", 31_000).await.unwrap();
        assert!(pending);
    }
}
