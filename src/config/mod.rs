//! Configuration module for Sonar.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Record output (directory, file names, queue capacity)
//! - Ingestion units (flow listener, trap listener, device poller)
//! - Rule thresholds
//! - Device inventory, optionally merged from a directory

mod app;
mod device;
mod validation;

pub use app::{AppConfig, DEFAULT_OUTPUT_DIR, SinkConfig};
pub use device::{CounterConfig, DeviceConfig, load_devices_from_dir};
pub use validation::{ConfigError, expand_env_vars, validate_devices};
