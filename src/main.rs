mod aggregator;
mod charger;
mod config;
mod controller;
mod dc_switch;
mod domain;
mod hardware;
mod inverter_coord;
mod power_limiter;
mod scheduler;
mod telemetry;
mod threshold;
mod time_utils;
mod zero_export;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use config::DpcConfig;
use controller::Controller;
use hardware::factory::{BusFactory, TransportMode};
use scheduler::{Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = DpcConfig::load().unwrap_or_else(|err| {
        eprintln!("falling back to built-in defaults: {err}");
        DpcConfig::default()
    });

    telemetry::init_tracing(&cfg.telemetry.log_level, cfg.telemetry.log_json);

    let mode = if cfg.bus.use_real_hardware { TransportMode::Real } else { TransportMode::Simulated };
    let factory = BusFactory::new(mode, Some(cfg.bus.can_iface.clone()), Some(cfg.bus.serial_path.clone()), cfg.bus.serial_baud);

    info!(model = %cfg.charger.model, solar_powered = cfg.general.solar_powered, "starting controller");
    let controller = Arc::new(Controller::new(cfg.clone(), &factory).await);

    let scheduler = Arc::new(Scheduler::new(controller, SchedulerConfig { tick_interval: std::time::Duration::from_secs(cfg.general.control_tick_seconds), ..SchedulerConfig::default() }));
    let handle = scheduler.spawn_with_shutdown();

    handle.await?;
    info!("controller shut down");
    Ok(())
}
