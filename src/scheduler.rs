#![allow(dead_code)]
//! Cooperative scheduler (Component I, spec §4.8). Drives the controller's
//! ~1 Hz control loop, tracks run/success/error counters the way the
//! teacher's `controller::scheduler::TaskScheduler` tracks its periodic
//! tasks, and drains in-flight bus transactions on Ctrl-C.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::controller::Controller;

#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_interval: Duration::from_secs(1), shutdown_grace: Duration::from_secs(5) }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    controller: Arc<Controller>,
    status: RwLock<TaskStatus>,
    now_ms: AtomicU32,
    shutting_down: AtomicBool,
}

impl Scheduler {
    pub fn new(controller: Arc<Controller>, config: SchedulerConfig) -> Self {
        Self { config, controller, status: RwLock::new(TaskStatus::default()), now_ms: AtomicU32::new(0), shutting_down: AtomicBool::new(false) }
    }

    pub async fn status(&self) -> TaskStatus {
        self.status.read().await.clone()
    }

    /// Runs the control loop until `shutdown()` is called, at which point it
    /// completes one final tick so any in-flight bus transaction is allowed
    /// to settle before returning.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.config.tick_interval);
        loop {
            ticker.tick().await;
            let now_ms = self.now_ms.fetch_add(self.config.tick_interval.as_millis() as u32, Ordering::Relaxed);
            self.run_one_tick(now_ms).await;

            if self.shutting_down.load(Ordering::Relaxed) {
                info!("scheduler draining final tick before shutdown");
                tokio::time::sleep(self.config.shutdown_grace.min(self.config.tick_interval)).await;
                break;
            }
        }
        info!("scheduler stopped");
    }

    async fn run_one_tick(&self, now_ms: u32) {
        let now = Utc::now();
        {
            let mut status = self.status.write().await;
            status.last_run = Some(now);
            status.run_count += 1;
        }

        match self.controller.tick(now_ms).await {
            Ok(()) => {
                let mut status = self.status.write().await;
                status.last_success = Some(now);
                status.success_count += 1;
                status.last_error = None;
            }
            Err(e) => {
                let mut status = self.status.write().await;
                status.error_count += 1;
                status.last_error = Some(e.to_string());
                warn!(error = %e, "control loop tick failed");
            }
        }
    }

    /// Spawns the control loop and a `tokio::signal::ctrl_c` listener that
    /// requests graceful shutdown.
    pub fn spawn_with_shutdown(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let runner = self.clone();
        let loop_handle = tokio::spawn(async move { runner.run().await });

        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install ctrl-c handler");
                return;
            }
            info!("ctrl-c received, requesting scheduler shutdown");
            self.shutting_down.store(true, Ordering::Relaxed);
        });

        loop_handle
    }

    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DpcConfig;
    use crate::hardware::factory::BusFactory;

    async fn test_controller() -> Arc<Controller> {
        let factory = BusFactory::simulated();
        Arc::new(Controller::new(DpcConfig::default(), &factory).await)
    }

    #[tokio::test]
    async fn single_tick_records_success_or_logged_error() {
        let controller = test_controller().await;
        let scheduler = Scheduler::new(controller, SchedulerConfig::default());
        scheduler.run_one_tick(0).await;
        let status = scheduler.status().await;
        assert_eq!(status.run_count, 1);
    }

    #[tokio::test]
    async fn shutdown_flag_is_observed() {
        let controller = test_controller().await;
        let scheduler = Arc::new(Scheduler::new(controller, SchedulerConfig::default()));
        scheduler.request_shutdown();
        assert!(scheduler.shutting_down.load(Ordering::Relaxed));
    }
}
