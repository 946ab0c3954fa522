//! `ControlPlaneConfig` (§6 environment variables): layered
//! defaults < config file < environment, following the teacher's
//! `config::Config::builder()` composition in `main.rs`.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::runner_registry::RunnerRegistryConfig;

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_runners() -> usize {
    1000
}

fn default_load_factor() -> f32 {
    0.8
}

fn default_heartbeat_timeout_ms() -> u64 {
    60_000
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_max_runners")]
    pub max_runners: usize,
    #[serde(default = "default_load_factor")]
    pub load_factor: f32,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_runners: default_max_runners(),
            load_factor: default_load_factor(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

impl ControlPlaneConfig {
    /// Loads defaults, then an optional TOML file, then `AC_CONTROL_*`
    /// environment overrides (highest precedence), mirroring the teacher's
    /// settings-layering order.
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("bind_addr", defaults.bind_addr)?
            .set_default("max_runners", defaults.max_runners as i64)?
            .set_default("load_factor", defaults.load_factor as f64)?
            .set_default("heartbeat_timeout_ms", defaults.heartbeat_timeout_ms as i64)?
            .set_default("health_check_interval_ms", defaults.health_check_interval_ms as i64)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("AC_CONTROL").separator("_"));

        builder.build()?.try_deserialize()
    }

    pub fn runner_registry_config(&self) -> RunnerRegistryConfig {
        RunnerRegistryConfig {
            max_runners: self.max_runners,
            load_factor: self.load_factor,
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
        }
    }
}
