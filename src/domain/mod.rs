pub mod bms;
pub mod inverter;
pub mod meter;
pub mod mppt;
pub mod types;

pub use bms::*;
pub use inverter::*;
pub use meter::*;
pub use mppt::*;
pub use types::*;
