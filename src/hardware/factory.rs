#![allow(dead_code)]
//! Transport factory selecting simulated or real CAN/RS-485 buses, mirroring
//! the teacher's `DeviceFactory` fallback-with-warning pattern: a `real`
//! request without the matching feature (or config) compiled in falls back
//! to simulation rather than panicking at startup.

use std::sync::Arc;

use crate::hardware::can::{CanBus, SimulatedCanBus};
use crate::hardware::rs485::{Rs485Bus, SimulatedRs485Bus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Simulated,
    #[allow(dead_code)]
    Real,
}

pub struct BusFactory {
    mode: TransportMode,
    can_iface: Option<String>,
    serial_path: Option<String>,
    serial_baud: u32,
}

impl BusFactory {
    pub fn new(mode: TransportMode, can_iface: Option<String>, serial_path: Option<String>, serial_baud: u32) -> Self {
        Self { mode, can_iface, serial_path, serial_baud }
    }

    pub fn simulated() -> Self {
        Self { mode: TransportMode::Simulated, can_iface: None, serial_path: None, serial_baud: 9600 }
    }

    pub fn create_can_bus(&self) -> Arc<dyn CanBus> {
        match self.mode {
            TransportMode::Simulated => Arc::new(SimulatedCanBus::new()),
            #[allow(unreachable_patterns)]
            TransportMode::Real => self.create_real_can_bus(),
        }
    }

    pub fn create_rs485_bus(&self) -> Arc<dyn Rs485Bus> {
        match self.mode {
            TransportMode::Simulated => Arc::new(SimulatedRs485Bus::new()),
            #[allow(unreachable_patterns)]
            TransportMode::Real => self.create_real_rs485_bus(),
        }
    }

    #[cfg(feature = "real")]
    fn create_real_can_bus(&self) -> Arc<dyn CanBus> {
        match self.can_iface.as_deref() {
            Some(iface) => match crate::hardware::can::real::SocketCanBus::open(iface) {
                Ok(bus) => Arc::new(bus),
                Err(err) => {
                    tracing::error!(error = %err, iface, "failed to open CAN interface, falling back to simulated");
                    Arc::new(SimulatedCanBus::new())
                }
            },
            None => {
                tracing::warn!("real CAN transport requested but no interface configured, falling back to simulated");
                Arc::new(SimulatedCanBus::new())
            }
        }
    }

    #[cfg(not(feature = "real"))]
    fn create_real_can_bus(&self) -> Arc<dyn CanBus> {
        tracing::warn!("real transport requested but the 'real' feature is not compiled in, falling back to simulated");
        Arc::new(SimulatedCanBus::new())
    }

    #[cfg(feature = "real")]
    fn create_real_rs485_bus(&self) -> Arc<dyn Rs485Bus> {
        match self.serial_path.as_deref() {
            Some(path) => match crate::hardware::rs485::real::SerialRs485Bus::open(path, self.serial_baud) {
                Ok(bus) => Arc::new(bus),
                Err(err) => {
                    tracing::error!(error = %err, path, "failed to open serial port, falling back to simulated");
                    Arc::new(SimulatedRs485Bus::new())
                }
            },
            None => {
                tracing::warn!("real RS-485 transport requested but no serial path configured, falling back to simulated");
                Arc::new(SimulatedRs485Bus::new())
            }
        }
    }

    #[cfg(not(feature = "real"))]
    fn create_real_rs485_bus(&self) -> Arc<dyn Rs485Bus> {
        tracing::warn!("real transport requested but the 'real' feature is not compiled in, falling back to simulated");
        Arc::new(SimulatedRs485Bus::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_factory_builds_both_buses() {
        let factory = BusFactory::simulated();
        let _can = factory.create_can_bus();
        let _rs485 = factory.create_rs485_bus();
    }
}
