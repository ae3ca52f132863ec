//! Anomaly rule engine.
//!
//! Pure, stateless classification of polled metrics and decoded flows.
//! Rules are evaluated independently and in table order; when several match,
//! the last label wins while every matching rule contributes a message note.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::device::{CPU_USAGE, DeviceKind, MEM_USAGE};
use crate::record::{FlowFields, Label, NormalizedRecord};

/// Load-average metric names checked against the overload threshold.
pub const LOAD_METRICS: [&str; 3] = ["load1", "load5", "load15"];

/// Vendor 5-second CPU average metric name (network devices only).
pub const CPU_5SEC: &str = "cpu5sec";

/// Interface receive rate metric name.
pub const RX_RATE: &str = "rx_rate";

/// Interface transmit rate metric name.
pub const TX_RATE: &str = "tx_rate";

fn default_load_threshold() -> f64 {
    80.0
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_mem_threshold() -> f64 {
    90.0
}

fn default_flow_bytes_threshold() -> u64 {
    5_000_000
}

fn default_suspicious_ports() -> BTreeSet<u16> {
    BTreeSet::from([23, 445])
}

fn default_icmp_protocol() -> u8 {
    1
}

fn default_rate_threshold() -> f64 {
    1_000_000.0
}

/// Rule thresholds. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Load-average overload threshold (default: 80).
    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,
    /// Derived CPU usage overload threshold in percent (default: 80).
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,
    /// Derived memory usage overload threshold in percent (default: 90).
    #[serde(default = "default_mem_threshold")]
    pub mem_threshold: f64,
    /// Network-device 5-second CPU average threshold (default: 80).
    #[serde(default = "default_cpu_threshold")]
    pub cpu5sec_threshold: f64,
    /// Flow byte count above which a flow is large (default: 5,000,000).
    #[serde(default = "default_flow_bytes_threshold")]
    pub flow_bytes_threshold: u64,
    /// Destination ports flagged as suspicious (default: 23, 445).
    #[serde(default = "default_suspicious_ports")]
    pub suspicious_ports: BTreeSet<u16>,
    /// IP protocol number flagged as ICMP (default: 1).
    #[serde(default = "default_icmp_protocol")]
    pub icmp_protocol: u8,
    /// Interface receive rate threshold in bytes/s (default: 1,000,000).
    #[serde(default = "default_rate_threshold")]
    pub rx_rate_threshold: f64,
    /// Interface transmit rate threshold in bytes/s (default: 1,000,000).
    #[serde(default = "default_rate_threshold")]
    pub tx_rate_threshold: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            load_threshold: default_load_threshold(),
            cpu_threshold: default_cpu_threshold(),
            mem_threshold: default_mem_threshold(),
            cpu5sec_threshold: default_cpu_threshold(),
            flow_bytes_threshold: default_flow_bytes_threshold(),
            suspicious_ports: default_suspicious_ports(),
            icmp_protocol: default_icmp_protocol(),
            rx_rate_threshold: default_rate_threshold(),
            tx_rate_threshold: default_rate_threshold(),
        }
    }
}

/// What is being classified.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    /// A raw or derived device metric.
    Metric {
        kind: DeviceKind,
        name: &'a str,
        value: f64,
    },
    /// A decoded flow entry.
    Flow(&'a FlowFields),
}

/// Result of classification: optional label plus diagnostic notes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub label: Option<Label>,
    pub notes: Vec<String>,
}

impl Classification {
    fn matched(&mut self, label: Label, note: String) {
        self.label = Some(label);
        self.notes.push(note);
    }

    /// Write the label and notes onto a record.
    pub fn apply(self, record: &mut NormalizedRecord) {
        if let Some(label) = self.label {
            record.label = Some(label);
        }
        for note in &self.notes {
            record.append_message(note);
        }
    }
}

/// Stateless rule engine shared read-only by all ingestion paths.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    config: RuleConfig,
}

impl RuleEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Classify a metric or flow.
    pub fn classify(&self, subject: Subject<'_>) -> Classification {
        match subject {
            Subject::Metric { kind, name, value } => self.classify_metric(kind, name, value),
            Subject::Flow(flow) => self.classify_flow(flow),
        }
    }

    /// Classify and apply the result to `record` in one step.
    pub fn label(&self, record: &mut NormalizedRecord, subject: Subject<'_>) {
        self.classify(subject).apply(record);
    }

    fn classify_metric(&self, kind: DeviceKind, name: &str, value: f64) -> Classification {
        let c = &self.config;
        let mut out = Classification::default();

        if LOAD_METRICS.contains(&name) && value > c.load_threshold {
            out.matched(
                Label::CpuOverload,
                format!(
                    "{name} usage > {}% (value={value})",
                    c.load_threshold
                ),
            );
        }
        if name == CPU_USAGE && value > c.cpu_threshold {
            out.matched(
                Label::CpuOverload,
                format!("CPU usage > {}%", c.cpu_threshold),
            );
        }
        if name == MEM_USAGE && value > c.mem_threshold {
            out.matched(
                Label::MemOverload,
                format!("Memory usage > {}% ({value:.1}%)", c.mem_threshold),
            );
        }
        if kind == DeviceKind::NetworkDevice && name == CPU_5SEC && value > c.cpu5sec_threshold {
            out.matched(
                Label::CpuOverload,
                format!("CPU > {}% (5sec avg: {value})", c.cpu5sec_threshold),
            );
        }
        if name == RX_RATE && value > c.rx_rate_threshold {
            out.matched(
                Label::HighRx,
                format!("rx rate > {} B/s ({value})", c.rx_rate_threshold),
            );
        }
        if name == TX_RATE && value > c.tx_rate_threshold {
            out.matched(
                Label::HighTx,
                format!("tx rate > {} B/s ({value})", c.tx_rate_threshold),
            );
        }

        out
    }

    fn classify_flow(&self, flow: &FlowFields) -> Classification {
        let c = &self.config;
        let mut out = Classification::default();

        if flow.octets.is_some_and(|o| o > c.flow_bytes_threshold) {
            out.matched(Label::HighFlow, "Large flow detected".to_string());
        }
        if let Some(port) = flow.dst_port
            && c.suspicious_ports.contains(&port)
        {
            out.matched(
                Label::SuspiciousPort,
                format!("Suspicious DST port {port}"),
            );
        }
        if flow.protocol == Some(c.icmp_protocol) {
            out.matched(Label::IcmpFlow, "ICMP flow flagged".to_string());
        }

        out
    }
}
