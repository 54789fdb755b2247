//! Server configuration.
//!
//! Loaded from a JSON file (every field optional), then overridden by
//! `NOVAGEN_*` environment variables. A missing file means defaults; a file
//! that fails to parse is ignored. Loading runs before the logger exists, so
//! the outcome is returned as a [`ConfigSource`] and logged by the caller.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use novagen_types::{sys_info, sys_warn};

pub const DEFAULT_CONFIG_PATH: &str = "assets/config.json";

/// Low-memory threshold: devices smaller than this always get aggressive optimization.
pub const DEFAULT_LOW_VRAM_THRESHOLD_GB: f64 = 12.0;
/// Utilization above which aggressive optimization kicks in.
pub const DEFAULT_HIGH_UTILIZATION_PCT: f64 = 80.0;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_concurrent_jobs must be at least 1")]
    NoConcurrency,
    #[error("poll_interval_ms must be at least 1")]
    ZeroPollInterval,
    #[error("{field} must be a positive number, got {value}")]
    NonPositiveThreshold { field: &'static str, value: f64 },
    #[error("invalid value '{value}' for {variable}")]
    InvalidEnv { variable: String, value: String },
}

/// Where GPU memory readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceProbeKind {
    /// Query `nvidia-smi` on every read.
    NvidiaSmi,
    /// Pretend no accelerator exists (CPU deployments).
    None,
}

/// Where the loaded settings came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Unparsable { path: PathBuf, reason: String },
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => sys_info!("[CONFIG] Loaded {}", path.display()),
            ConfigSource::Missing(path) => {
                sys_info!("[CONFIG] {} not found, using defaults", path.display())
            }
            ConfigSource::Unparsable { path, reason } => sys_warn!(
                "[CONFIG] Failed to parse {}: {}, using defaults",
                path.display(),
                reason
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_concurrent_jobs: usize,
    pub poll_interval_ms: u64,
    pub low_vram_threshold_gb: f64,
    pub high_utilization_pct: f64,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub device_probe: DeviceProbeKind,
    /// Per-step delay of the simulated inference backend.
    pub simulated_step_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7860,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            low_vram_threshold_gb: DEFAULT_LOW_VRAM_THRESHOLD_GB,
            high_utilization_pct: DEFAULT_HIGH_UTILIZATION_PCT,
            output_dir: PathBuf::from("outputs"),
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
            device_probe: DeviceProbeKind::NvidiaSmi,
            simulated_step_delay_ms: 50,
        }
    }
}

impl ServerConfig {
    /// Load from `path`, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource), ConfigError> {
        let (mut config, source) = load_config_file(path);
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok((config, source))
    }

    /// Apply `NOVAGEN_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("NOVAGEN_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("NOVAGEN_PORT") {
            self.port = parse_env("NOVAGEN_PORT", &port)?;
        }
        if let Some(max) = lookup("NOVAGEN_MAX_CONCURRENT_JOBS") {
            self.max_concurrent_jobs = parse_env("NOVAGEN_MAX_CONCURRENT_JOBS", &max)?;
        }
        if let Some(dir) = lookup("NOVAGEN_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("NOVAGEN_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(probe) = lookup("NOVAGEN_DEVICE_PROBE") {
            self.device_probe = match probe.as_str() {
                "nvidia-smi" => DeviceProbeKind::NvidiaSmi,
                "none" => DeviceProbeKind::None,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        variable: "NOVAGEN_DEVICE_PROBE".to_string(),
                        value: probe,
                    })
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        for (field, value) in [
            ("low_vram_threshold_gb", self.low_vram_threshold_gb),
            ("high_utilization_pct", self.high_utilization_pct),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositiveThreshold { field, value });
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: std::str::FromStr>(variable: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        variable: variable.to_string(),
        value: value.to_string(),
    })
}

/// Read the JSON config file, falling back to defaults.
pub fn load_config_file(path: &Path) -> (ServerConfig, ConfigSource) {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return (ServerConfig::default(), ConfigSource::Missing(path.to_path_buf())),
    };
    match serde_json::from_str::<ServerConfig>(&content) {
        Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
        Err(e) => (
            ServerConfig::default(),
            ConfigSource::Unparsable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        ),
    }
}
