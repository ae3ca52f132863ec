//! Normalized record model shared by every ingestion path and the sink.
//!
//! - [`NormalizedRecord`]: one row of the structured output log
//! - [`RecordType`]: which ingestion path produced the row
//! - [`Label`]: anomaly tag assigned by the rule engine
//! - [`FlowFields`]: addresses, ports and counters of one decoded flow

use std::net::Ipv4Addr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Timestamp format used in the output columns (second resolution, local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column order of every record stream. Stable across restarts.
pub const COLUMNS: [&str; 7] = [
    "timestamp",
    "source",
    "record_type",
    "metric",
    "value",
    "label",
    "message",
];

/// Ingestion path that produced a record.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RecordType {
    /// Decoded flow-export entry.
    Flow,
    /// Polled device metric.
    SnmpPoll,
    /// Unsolicited notification.
    SnmpTrap,
}

/// Anomaly tag. Absence of a label means no rule matched.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Label {
    CpuOverload,
    MemOverload,
    HighFlow,
    SuspiciousPort,
    IcmpFlow,
    HighRx,
    HighTx,
}

/// Fields extracted from one decoded flow entry. Absent fields were not
/// present in the entry's layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowFields {
    pub src_addr: Option<Ipv4Addr>,
    pub dst_addr: Option<Ipv4Addr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub packets: Option<u64>,
    pub octets: Option<u64>,
    pub protocol: Option<u8>,
}

/// One normalized telemetry record.
///
/// Decoders build records with [`NormalizedRecord::new`]; only
/// [`crate::rules::Classification::apply`] sets [`NormalizedRecord::label`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// Capture time.
    pub timestamp: DateTime<Local>,
    /// Exporter or device identity.
    pub source: String,
    /// Producing ingestion path.
    pub record_type: RecordType,
    /// Metric key (`cpuUsage`, `rx_rate`, `flow`, `trap`, ...).
    pub metric: String,
    /// Numeric value, absent when the underlying query failed.
    pub value: Option<f64>,
    /// Anomaly tag set by the rule engine.
    pub label: Option<Label>,
    /// Free-text diagnostic.
    pub message: String,
}

impl NormalizedRecord {
    /// Create an unlabeled record.
    pub fn new(
        timestamp: DateTime<Local>,
        source: impl Into<String>,
        record_type: RecordType,
        metric: impl Into<String>,
        value: Option<f64>,
    ) -> Self {
        Self {
            timestamp,
            source: source.into(),
            record_type,
            metric: metric.into(),
            value,
            label: None,
            message: String::new(),
        }
    }

    /// Set the diagnostic message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Append a note to the message, separated by `" | "`.
    pub fn append_message(&mut self, note: &str) {
        if self.message.is_empty() {
            self.message.push_str(note);
        } else {
            self.message.push_str(" | ");
            self.message.push_str(note);
        }
    }

    /// Render the record as the seven output columns.
    pub fn to_row(&self) -> [String; 7] {
        [
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.source.clone(),
            self.record_type.to_string(),
            self.metric.clone(),
            self.value.map(format_value).unwrap_or_default(),
            self.label.map(|l| l.to_string()).unwrap_or_default(),
            self.message.clone(),
        ]
    }
}

/// Format a value the way downstream tooling expects: integral values keep
/// one decimal (`42.0`), everything else uses the shortest round-trip form.
pub fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}
