//! `RunnerConfig` (§6 environment variables), layered the same way as
//! `ac_control::config::ControlPlaneConfig`: defaults, then an optional TOML
//! file, then `AC_RUNNER_*` environment overrides.

use std::time::Duration;

use ac_workspace::WorkspaceManagerConfig;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

fn default_workspace_dir() -> String {
    "/tmp/ai-village-workspaces".to_string()
}

fn default_cache_dir() -> String {
    "/tmp/ai-village-cache".to_string()
}

fn default_max_sessions() -> usize {
    10
}

fn default_control_plane_url() -> String {
    "ws://127.0.0.1:8080/runners/ws".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_providers() -> Vec<String> {
    vec!["codex".to_string(), "claude_code".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_control_plane_url")]
    pub control_plane_url: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
    #[serde(default)]
    pub hostname_override: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            cache_dir: default_cache_dir(),
            max_sessions: default_max_sessions(),
            control_plane_url: default_control_plane_url(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            providers: default_providers(),
            hostname_override: None,
        }
    }
}

impl RunnerConfig {
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("workspace_dir", defaults.workspace_dir)?
            .set_default("cache_dir", defaults.cache_dir)?
            .set_default("max_sessions", defaults.max_sessions as i64)?
            .set_default("control_plane_url", defaults.control_plane_url)?
            .set_default("heartbeat_interval_ms", defaults.heartbeat_interval_ms as i64)?
            .set_default("providers", defaults.providers)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("AC_RUNNER").separator("_"));

        builder.build()?.try_deserialize()
    }

    pub fn workspace_manager_config(&self) -> WorkspaceManagerConfig {
        WorkspaceManagerConfig {
            base_dir: self.workspace_dir.clone().into(),
            cache_dir: self.cache_dir.clone().into(),
            ..Default::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
