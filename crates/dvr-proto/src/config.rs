use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_address")]
    pub address: String,
    /// How the controller decides whether the service is running before it
    /// opens a connection.
    #[serde(default)]
    pub registry: RegistryKind,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// Read/write timeout for a single command round trip.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    /// `<data_dir>/<service>.pid` must exist and name a live process.
    #[default]
    PidFile,
    /// Skip the registry check and go straight to the connection attempt.
    None,
}

/// What happens after the settle delay of a mode change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// Assume the requested mode took effect.
    #[default]
    Optimistic,
    /// Re-query the service once and adopt whatever it reports.
    Readback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub confirmation: ConfirmationPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Frames between two refreshes of mode and address.
    #[serde(default = "default_interval_ticks")]
    pub interval_ticks: u32,
    /// Frame rate the presentation layer is assumed to tick at.  Only used to
    /// compute the wall-clock refresh period.
    #[serde(default = "default_nominal_fps")]
    pub nominal_fps: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            address: default_service_address(),
            registry: RegistryKind::default(),
            pid_file: default_pid_file(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            confirmation: ConfirmationPolicy::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ticks: default_interval_ticks(),
            nominal_fps: default_nominal_fps(),
        }
    }
}

fn default_service_name() -> String {
    platform::SERVICE_NAME.to_string()
}

fn default_service_address() -> String {
    platform::service_address()
}

fn default_pid_file() -> PathBuf {
    platform::service_pid_file(platform::SERVICE_NAME)
}

fn default_io_timeout_ms() -> u64 {
    1000
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_interval_ticks() -> u32 {
    30
}

fn default_nominal_fps() -> u32 {
    60
}

impl ServiceConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl SessionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl PollConfig {
    /// Duration of one frame at the nominal rate.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.nominal_fps.max(1)
    }

    /// Wall-clock time between two refreshes at the nominal rate.
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_ticks.max(1))) / self.nominal_fps.max(1)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, writing the defaults there first if it is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
