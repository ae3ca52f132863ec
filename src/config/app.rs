//! Application configuration structures.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collector::flow::FlowConfig;
use crate::collector::poller::PollerConfig;
use crate::collector::trap::TrapConfig;
use crate::rules::RuleConfig;
use crate::sink::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_FLOW_FILE, DEFAULT_POLL_FILE, DEFAULT_TRAP_FILE, StreamPaths};

use super::device::{DeviceConfig, load_devices_from_dir};
use super::validation::{ConfigError, validate_devices};

// =============================================================================
// Constants
// =============================================================================

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = ".";

/// A timed-out query is retried at most once.
pub const MAX_POLL_RETRIES: u32 = 1;

fn default_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_flow_file() -> String {
    DEFAULT_FLOW_FILE.to_string()
}

fn default_poll_file() -> String {
    DEFAULT_POLL_FILE.to_string()
}

fn default_trap_file() -> String {
    DEFAULT_TRAP_FILE.to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

// =============================================================================
// Sink Configuration
// =============================================================================

/// Record output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Output directory (default: current directory).
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Flow record file (default: "netflow_flows.csv").
    #[serde(default = "default_flow_file")]
    pub flow_file: String,

    /// Poll record file (default: "snmp_poll.csv").
    #[serde(default = "default_poll_file")]
    pub poll_file: String,

    /// Trap record file (default: "snmp_traps.csv").
    #[serde(default = "default_trap_file")]
    pub trap_file: String,

    /// Queue capacity between ingestion paths and the writer (default: 10000).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            flow_file: default_flow_file(),
            poll_file: default_poll_file(),
            trap_file: default_trap_file(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SinkConfig {
    /// Resolved output file of each stream.
    pub fn stream_paths(&self) -> StreamPaths {
        StreamPaths {
            flow: self.dir.join(&self.flow_file),
            poll: self.dir.join(&self.poll_file),
            trap: self.dir.join(&self.trap_file),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Record output.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Flow-export listener.
    #[serde(default)]
    pub flow: FlowConfig,

    /// Trap listener.
    #[serde(default)]
    pub trap: TrapConfig,

    /// Device poller.
    #[serde(default)]
    pub poller: PollerConfig,

    /// Anomaly rule thresholds.
    #[serde(default)]
    pub rules: RuleConfig,

    /// Device inventory.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Directory with additional device files, merged into `devices`.
    #[serde(default)]
    pub device_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// Devices from `device_path` are merged in and credentials are expanded
    /// before validation.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_yaml::from_str(&content)?;

        if let Some(ref device_dir) = config.device_path {
            let extra = load_devices_from_dir(device_dir)?;
            tracing::info!(
                "Loaded {} device(s) from: {}",
                extra.len(),
                device_dir.display()
            );
            config.devices.extend(extra);
        }
        for device in &mut config.devices {
            device.expand_env();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sink.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "sink channel_capacity must be positive".to_string(),
            ));
        }
        for (stream, file) in [
            ("flow_file", &self.sink.flow_file),
            ("poll_file", &self.sink.poll_file),
            ("trap_file", &self.sink.trap_file),
        ] {
            if file.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "sink {stream} cannot be empty"
                )));
            }
        }

        if self.flow.port == 0 {
            return Err(ConfigError::ValidationError(
                "flow port must be non-zero".to_string(),
            ));
        }
        if self.flow.recv_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "flow recv_buffer must be positive".to_string(),
            ));
        }

        if self.trap.port == 0 {
            return Err(ConfigError::ValidationError(
                "trap port must be non-zero".to_string(),
            ));
        }

        if self.poller.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poller interval must be non-zero".to_string(),
            ));
        }
        if self.poller.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "poller timeout must be non-zero".to_string(),
            ));
        }
        if self.poller.retries > MAX_POLL_RETRIES {
            return Err(ConfigError::ValidationError(format!(
                "poller retries must be at most {MAX_POLL_RETRIES}, got {}",
                self.poller.retries
            )));
        }
        if self.poller.port == 0 {
            return Err(ConfigError::ValidationError(
                "poller port must be non-zero".to_string(),
            ));
        }

        validate_devices(&self.devices)
    }
}
