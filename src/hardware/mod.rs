pub mod can;
pub mod crc;
pub mod factory;
pub mod rs485;

pub use can::{CanBus, CanFrame};
pub use factory::{BusFactory, TransportMode};
pub use rs485::Rs485Bus;
