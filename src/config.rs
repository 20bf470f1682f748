#![allow(dead_code)]
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-level configuration for the controller (spec §2c, §6 "Configuration").
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DpcConfig {
    #[validate(nested)]
    pub general: GeneralConfig,

    #[validate(nested)]
    pub bus: BusConfig,

    #[validate(nested)]
    pub charger: ChargerConfig,

    #[validate(nested)]
    pub threshold: ThresholdSettings,

    #[validate(nested)]
    pub limiter: LimiterSettings,

    #[validate(nested)]
    pub zero_export: ZeroExportSettings,

    #[validate(nested)]
    pub telemetry: TelemetrySettings,
}

/// Top-level enable flags and poll cadence.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GeneralConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub verbose_logging: bool,

    #[serde(default = "default_true")]
    pub solar_powered: bool,

    #[validate(range(min = 100, max = 60_000))]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[validate(range(min = 1))]
    #[serde(default = "default_control_tick_seconds")]
    pub control_tick_seconds: u64,
}

/// Peripheral bus wiring (spec §4.1, §6 GPIO).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BusConfig {
    #[serde(default = "default_can_iface")]
    pub can_iface: String,

    #[serde(default = "default_serial_path")]
    pub serial_path: String,

    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,

    #[serde(default = "default_precharge_pin")]
    pub precharge_gpio_pin: u8,

    #[serde(default = "default_main_pin")]
    pub main_gpio_pin: u8,

    #[serde(default = "default_charger_enable_pin")]
    pub charger_enable_gpio_pin: u8,

    #[serde(default)]
    pub use_real_hardware: bool,
}

/// Charger protocol engine settings (spec §4.2).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ChargerConfig {
    #[validate(length(min = 1))]
    pub model: String,

    #[serde(default)]
    pub psu_device_id: Option<u8>,

    #[validate(range(min = 0.0, max = 5.0))]
    #[serde(default = "default_charger_hysteresis_a")]
    pub current_hysteresis_a: f32,

    /// Percentage headroom below `recommended_charge_current_a` that
    /// re-arms `charge_immediately` after a cutoff (§9 Open Question #4).
    #[validate(range(min = 0.0, max = 50.0))]
    #[serde(default = "default_recovery_offset_pct")]
    pub immediate_charge_recovery_offset_pct: f32,
}

/// Threshold & mode logic settings (spec §4.5).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ThresholdSettings {
    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_start_pct: f32,

    #[validate(range(min = 0.0, max = 100.0))]
    pub soc_stop_pct: f32,

    #[validate(range(min = 0.0, max = 100.0))]
    pub voltage_start_v: f32,

    #[validate(range(min = 0.0, max = 100.0))]
    pub voltage_stop_v: f32,

    #[validate(range(min = 0.0, max = 100.0))]
    pub fsp_entry_pct: f32,

    #[validate(range(min = 0.0, max = 100.0))]
    pub fsp_exit_pct: f32,

    #[serde(default)]
    pub night_use_enabled: bool,
}

/// Dynamic Power Limiter settings (spec §4.6).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LimiterSettings {
    #[validate(range(min = 0))]
    pub lower_limit_w: u32,

    #[validate(range(min = 1))]
    pub upper_limit_w: u32,

    #[validate(range(min = 0))]
    #[serde(default = "default_hysteresis_w")]
    pub hysteresis_w: u32,

    #[serde(default)]
    pub target_consumption_w: f32,

    #[serde(default = "default_true")]
    pub meter_includes_inverter: bool,

    #[serde(default)]
    pub base_load_fallback_w: f32,

    #[validate(range(min = 0.0, max = 50.0))]
    #[serde(default)]
    pub passthrough_losses_pct: f32,

    #[validate(range(min = 0, max = 23))]
    #[serde(default)]
    pub restart_hour: Option<u8>,

    #[validate(length(min = 1))]
    pub primary_inverter_serial: String,
}

/// Zero-Export PI controller settings (spec §4.7).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ZeroExportSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub max_grid_w: f32,

    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(default = "default_minimum_limit_pct")]
    pub minimum_limit_pct: f64,

    #[validate(range(min = 0.0))]
    #[serde(default = "default_power_hysteresis_w")]
    pub power_hysteresis_w: f32,

    #[validate(range(min = 0.1))]
    #[serde(default = "default_tn_seconds")]
    pub tn_seconds: f64,

    #[serde(default)]
    pub selected_serials: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_control_tick_seconds() -> u64 {
    1
}
fn default_can_iface() -> String {
    "can0".to_string()
}
fn default_serial_path() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_serial_baud() -> u32 {
    9600
}
fn default_precharge_pin() -> u8 {
    17
}
fn default_main_pin() -> u8 {
    27
}
fn default_charger_enable_pin() -> u8 {
    22
}
fn default_charger_hysteresis_a() -> f32 {
    0.2
}
fn default_recovery_offset_pct() -> f32 {
    5.0
}
fn default_hysteresis_w() -> u32 {
    10
}
fn default_minimum_limit_pct() -> f64 {
    1.0
}
fn default_power_hysteresis_w() -> f32 {
    10.0
}
fn default_tn_seconds() -> f64 {
    5.0
}
fn default_log_level() -> String {
    "info".to_string()
}

impl DpcConfig {
    /// Loads configuration from `config/default.toml`, an optional
    /// environment-specific overlay, then `DPC__`-prefixed environment
    /// variables, in that order of increasing precedence.
    pub fn load() -> Result<Self> {
        Self::load_with_env(None)
    }

    pub fn load_with_env(environment: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config/default.toml"));

        if let Some(env) = environment {
            figment = figment.merge(Toml::file(format!("config/{env}.toml")));
        }

        figment = figment.merge(Env::prefixed("DPC__").split("__"));

        let config: DpcConfig = figment.extract().context("failed to parse configuration")?;
        config.validate().context("configuration validation failed")?;
        Ok(config)
    }
}

impl Default for DpcConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                enabled: true,
                verbose_logging: false,
                solar_powered: true,
                poll_interval_ms: default_poll_interval_ms(),
                control_tick_seconds: default_control_tick_seconds(),
            },
            bus: BusConfig {
                can_iface: default_can_iface(),
                serial_path: default_serial_path(),
                serial_baud: default_serial_baud(),
                precharge_gpio_pin: default_precharge_pin(),
                main_gpio_pin: default_main_pin(),
                charger_enable_gpio_pin: default_charger_enable_pin(),
                use_real_hardware: false,
            },
            charger: ChargerConfig {
                model: "NPB-1200-48".to_string(),
                psu_device_id: None,
                current_hysteresis_a: default_charger_hysteresis_a(),
                immediate_charge_recovery_offset_pct: default_recovery_offset_pct(),
            },
            threshold: ThresholdSettings {
                soc_start_pct: 80.0,
                soc_stop_pct: 20.0,
                voltage_start_v: 52.0,
                voltage_stop_v: 48.0,
                fsp_entry_pct: 90.0,
                fsp_exit_pct: 40.0,
                night_use_enabled: false,
            },
            limiter: LimiterSettings {
                lower_limit_w: 10,
                upper_limit_w: 800,
                hysteresis_w: default_hysteresis_w(),
                target_consumption_w: 0.0,
                meter_includes_inverter: true,
                base_load_fallback_w: 150.0,
                passthrough_losses_pct: 0.0,
                restart_hour: None,
                primary_inverter_serial: "S1".to_string(),
            },
            zero_export: ZeroExportSettings {
                enabled: false,
                max_grid_w: 0.0,
                minimum_limit_pct: default_minimum_limit_pct(),
                power_hysteresis_w: default_power_hysteresis_w(),
                tn_seconds: default_tn_seconds(),
                selected_serials: vec!["S1".to_string()],
            },
            telemetry: TelemetrySettings { log_level: default_log_level(), log_json: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_validation() {
        assert!(DpcConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_charger_model() {
        let mut config = DpcConfig::default();
        config.charger.model = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_lower_limit_above_u32_bounds_is_impossible_but_upper_must_be_nonzero() {
        let mut config = DpcConfig::default();
        config.limiter.upper_limit_w = 0;
        assert!(config.validate().is_err());
    }
}
