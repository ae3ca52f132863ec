//! Device kinds and their metric-derivation profiles.
//!
//! The kind is resolved once when the inventory is loaded; the poller then asks
//! the kind's [`MetricProfile`] which derived metrics a raw reading produces.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Normalized CPU usage metric name.
pub const CPU_USAGE: &str = "cpuUsage";
/// Normalized memory usage metric name.
pub const MEM_USAGE: &str = "memUsage";
/// Total memory metric used as the `memUsage` denominator.
pub const MEM_TOTAL: &str = "memTotal";

/// Closed set of monitored device kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum DeviceKind {
    /// Linux host running a net-snmp agent.
    Linux,
    /// Router or switch with vendor CPU MIBs.
    #[serde(alias = "cisco")]
    #[strum(to_string = "network-device", serialize = "cisco")]
    NetworkDevice,
}

impl DeviceKind {
    /// Derivation profile for this kind.
    pub fn profile(self) -> &'static dyn MetricProfile {
        match self {
            Self::Linux => &LinuxProfile,
            Self::NetworkDevice => &NetworkDeviceProfile,
        }
    }
}

/// A metric derived from one raw reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
    /// Value computed directly from the raw reading.
    Direct { metric: &'static str, value: f64 },
    /// `numerator / <denominator metric> * 100`, with the denominator read fresh.
    Percentage {
        metric: &'static str,
        numerator: f64,
        denominator: &'static str,
    },
}

/// Metric-derivation capability implemented by every device kind.
pub trait MetricProfile: Send + Sync {
    /// Derived metrics produced by a raw `metric` reading of `value`.
    fn derive(&self, metric: &str, value: f64) -> Vec<Derived>;
}

/// net-snmp UCD-MIB host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxProfile;

impl MetricProfile for LinuxProfile {
    fn derive(&self, metric: &str, value: f64) -> Vec<Derived> {
        match metric {
            "cpuIdle" => vec![Derived::Direct {
                metric: CPU_USAGE,
                value: 100.0 - value,
            }],
            "cpuUser" => vec![Derived::Direct {
                metric: CPU_USAGE,
                value,
            }],
            "memUsed" => vec![Derived::Percentage {
                metric: MEM_USAGE,
                numerator: value,
                denominator: MEM_TOTAL,
            }],
            _ => Vec::new(),
        }
    }
}

/// Network device: the 5-second CPU average is classified as-is, nothing is derived.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkDeviceProfile;

impl MetricProfile for NetworkDeviceProfile {
    fn derive(&self, _metric: &str, _value: f64) -> Vec<Derived> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_parsing() {
        assert_eq!(DeviceKind::from_str("linux").unwrap(), DeviceKind::Linux);
        assert_eq!(
            DeviceKind::from_str("network-device").unwrap(),
            DeviceKind::NetworkDevice
        );
        assert_eq!(
            DeviceKind::from_str("cisco").unwrap(),
            DeviceKind::NetworkDevice
        );
        assert_eq!(DeviceKind::NetworkDevice.to_string(), "network-device");
    }

    #[test]
    fn test_kind_yaml_alias() {
        let kind: DeviceKind = serde_yaml::from_str("cisco").unwrap();
        assert_eq!(kind, DeviceKind::NetworkDevice);
    }

    #[test]
    fn test_linux_cpu_idle() {
        let derived = DeviceKind::Linux.profile().derive("cpuIdle", 15.0);
        assert_eq!(
            derived,
            vec![Derived::Direct {
                metric: CPU_USAGE,
                value: 85.0
            }]
        );
    }

    #[test]
    fn test_linux_cpu_user_stands_in() {
        let derived = DeviceKind::Linux.profile().derive("cpuUser", 42.0);
        assert_eq!(
            derived,
            vec![Derived::Direct {
                metric: CPU_USAGE,
                value: 42.0
            }]
        );
    }

    #[test]
    fn test_linux_mem_used() {
        let derived = DeviceKind::Linux.profile().derive("memUsed", 900.0);
        assert_eq!(
            derived,
            vec![Derived::Percentage {
                metric: MEM_USAGE,
                numerator: 900.0,
                denominator: MEM_TOTAL,
            }]
        );
    }

    #[test]
    fn test_network_device_derives_nothing() {
        assert!(
            DeviceKind::NetworkDevice
                .profile()
                .derive("cpuIdle", 10.0)
                .is_empty()
        );
        assert!(DeviceKind::Linux.profile().derive("load1", 1.0).is_empty());
    }
}
