//! Configuration validation utilities.

use std::collections::HashSet;
use std::str::FromStr;

use thiserror::Error;

use crate::snmp::Oid;

use super::device::{CounterConfig, DeviceConfig};

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Validate the device inventory: unique names, dotted OIDs, complete
/// counter sources.
pub fn validate_devices(devices: &[DeviceConfig]) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();

    for device in devices {
        if device.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "device name cannot be empty".to_string(),
            ));
        }
        if !seen_names.insert(device.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate device name: '{}'",
                device.name
            )));
        }
        if device.port == Some(0) {
            return Err(ConfigError::ValidationError(format!(
                "device '{}': port must be non-zero",
                device.name
            )));
        }

        for (metric, oid) in &device.metrics {
            if metric.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "device '{}': metric name cannot be empty",
                    device.name
                )));
            }
            // Some OIDs parse but cannot be put on the wire, e.g. a first arc above 2.
            Oid::from_str(oid)
                .and_then(|oid| oid.encode(&mut Vec::new()))
                .map_err(|e| {
                    ConfigError::ValidationError(format!(
                        "device '{}': metric '{}': {}",
                        device.name, metric, e
                    ))
                })?;
        }

        match &device.counters {
            Some(CounterConfig::Snmp { if_index: 0 }) => {
                return Err(ConfigError::ValidationError(format!(
                    "device '{}': counters if_index must be positive",
                    device.name
                )));
            }
            Some(CounterConfig::Shell {
                interface, command, ..
            }) => {
                if interface.trim().is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "device '{}': counters interface cannot be empty",
                        device.name
                    )));
                }
                if let Some(command) = command
                    && shell_words::split(command).map_or(true, |argv| argv.is_empty())
                {
                    return Err(ConfigError::ValidationError(format!(
                        "device '{}': invalid counters command '{}'",
                        device.name, command
                    )));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use std::collections::BTreeMap;

    fn device(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            address: "10.0.0.2".parse().unwrap(),
            port: None,
            community: "public".to_string(),
            kind: DeviceKind::Linux,
            metrics: BTreeMap::from([("load1".to_string(), ".1.3.6.1.4.1.2021.10.1.3.1".to_string())]),
            counters: None,
        }
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("public"), "public");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("${NONEXISTENT_COMMUNITY_12345:-fallback}");
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: This test runs in isolation and only modifies a test-specific variable.
        unsafe {
            std::env::set_var("TEST_SONAR_COMMUNITY", "s3cret");
        }
        let result = expand_env_vars("${TEST_SONAR_COMMUNITY}");
        assert_eq!(result, "s3cret");
        // SAFETY: Cleanup test variable.
        unsafe {
            std::env::remove_var("TEST_SONAR_COMMUNITY");
        }
    }

    #[test]
    fn test_validate_devices_valid() {
        assert!(validate_devices(&[device("VM1"), device("VM2")]).is_ok());
    }

    #[test]
    fn test_validate_devices_duplicate_names() {
        let result = validate_devices(&[device("VM1"), device("VM1")]);
        assert!(result.unwrap_err().to_string().contains("duplicate device name"));
    }

    #[test]
    fn test_validate_devices_empty_name() {
        assert!(validate_devices(&[device(" ")]).is_err());
    }

    #[test]
    fn test_validate_devices_bad_oid() {
        let mut d = device("VM1");
        d.metrics.insert("cpuIdle".to_string(), "1.3.six.1".to_string());
        let result = validate_devices(&[d]);
        assert!(result.unwrap_err().to_string().contains("cpuIdle"));
    }

    #[test]
    fn test_validate_devices_unencodable_oid() {
        for bad in ["5.1", "1.45.2"] {
            let mut d = device("VM1");
            d.metrics.insert("cpuIdle".to_string(), bad.to_string());
            let result = validate_devices(&[d]);
            assert!(result.unwrap_err().to_string().contains("cpuIdle"), "{bad}");
        }
    }

    #[test]
    fn test_validate_devices_incomplete_counters() {
        let mut d = device("VM1");
        d.counters = Some(CounterConfig::Snmp { if_index: 0 });
        assert!(validate_devices(&[d.clone()]).is_err());

        d.counters = Some(CounterConfig::Shell {
            interface: String::new(),
            user: None,
            command: None,
            timeout: None,
        });
        assert!(validate_devices(&[d.clone()]).is_err());

        d.counters = Some(CounterConfig::Shell {
            interface: "eth0".to_string(),
            user: None,
            command: Some("'unterminated".to_string()),
            timeout: None,
        });
        assert!(validate_devices(&[d]).is_err());
    }

    #[test]
    fn test_validate_devices_zero_port() {
        let mut d = device("VM1");
        d.port = Some(0);
        assert!(validate_devices(&[d]).is_err());
    }
}
