//! Device inventory configuration.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceKind;

use super::validation::{ConfigError, expand_env_vars};

fn default_community() -> String {
    "public".to_string()
}

/// Where a device's interface byte counters come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CounterConfig {
    /// `ifHCInOctets` / `ifHCOutOctets` at `if_index`.
    Snmp { if_index: u32 },
    /// `/proc/net/dev` read through a remote shell.
    Shell {
        interface: String,
        #[serde(default)]
        user: Option<String>,
        /// Command template; `{target}`, `{address}`, `{user}` and
        /// `{interface}` are substituted.
        #[serde(default)]
        command: Option<String>,
        /// Overrides the poller query timeout.
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
    },
}

/// One monitored device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device name, used as the record source.
    pub name: String,

    /// Agent IP address.
    #[serde(alias = "ip")]
    pub address: IpAddr,

    /// Agent port (default: the poller port).
    #[serde(default)]
    pub port: Option<u16>,

    /// SNMP v2c community (default: "public"). Supports `${VAR}` expansion.
    #[serde(default = "default_community")]
    pub community: String,

    /// Device kind selecting the derivation profile.
    #[serde(alias = "type")]
    pub kind: DeviceKind,

    /// Metric name to dotted OID.
    #[serde(default, alias = "oids")]
    pub metrics: BTreeMap<String, String>,

    /// Optional interface counter source.
    #[serde(default)]
    pub counters: Option<CounterConfig>,
}

impl DeviceConfig {
    /// Expand `${VAR}` references in credential fields.
    pub fn expand_env(&mut self) {
        self.community = expand_env_vars(&self.community);
        if let Some(CounterConfig::Shell { user, command, .. }) = &mut self.counters {
            if let Some(user) = user {
                *user = expand_env_vars(user);
            }
            if let Some(command) = command {
                *command = expand_env_vars(command);
            }
        }
    }
}

/// Layout of a file under `device_path`.
#[derive(Debug, Default, Deserialize)]
struct DeviceFile {
    #[serde(default)]
    devices: Vec<DeviceConfig>,
}

/// Load device definitions from all YAML files in a directory.
///
/// Files are read in name order so the merged inventory is stable.
pub fn load_devices_from_dir(dir: &Path) -> Result<Vec<DeviceConfig>, ConfigError> {
    if !dir.exists() {
        return Err(ConfigError::ValidationError(format!(
            "device_path '{}' does not exist",
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(ConfigError::ValidationError(format!(
            "device_path '{}' is not a directory",
            dir.display()
        )));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext == "yaml" || ext == "yml" {
            paths.push(path);
        }
    }
    paths.sort();

    let mut devices = Vec::new();
    for path in paths {
        tracing::debug!("Loading device config from: {}", path.display());
        let content = std::fs::read_to_string(&path)?;
        let file: DeviceFile = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ValidationError(format!("failed to parse '{}': {}", path.display(), e))
        })?;
        devices.extend(file.devices);
    }

    Ok(devices)
}
