//! Sonar - Testbed Telemetry Collector
//!
//! This crate ingests network telemetry from a lab testbed, normalizes it into
//! a single record shape, labels anomalies with fixed threshold rules and
//! appends the records to per-stream CSV files. It can be used as a library or
//! run as the standalone `sonar` binary.
//!
//! # Architecture
//!
//! - **Collectors**: Flow-export listener, SNMP trap listener and device poller
//! - **Rules**: Threshold classification of flows and device metrics
//! - **Sink**: Single writer thread owning the CSV record streams
//! - **SNMP**: Minimal BER codec, v2c GET client and notification decoding
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sonar::{AppConfig, CollectorRegistry, FlowCollector, RuleEngine, SinkBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/config.yaml")?;
//! let handles = SinkBuilder::new(&config.sink.dir)
//!     .paths(config.sink.stream_paths())
//!     .build()?;
//! let rules = Arc::new(RuleEngine::new(config.rules.clone()));
//!
//! let registry = CollectorRegistry::new();
//! let flow = FlowCollector::bind(config.flow.clone(), rules, handles.writer.clone()).await?;
//! registry.spawn(flow).await;
//!
//! registry.shutdown().await;
//! handles.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod device;
pub mod record;
pub mod rules;
pub mod sink;
pub mod snmp;

pub use collector::flow::{FlowCollector, FlowConfig, FlowDecoder};
pub use collector::poller::{DevicePoller, PolledDevice, PollerConfig};
pub use collector::trap::{TrapCollector, TrapConfig};
pub use collector::{Collector, CollectorError, CollectorRegistry, JobInfo, Schedule};
pub use config::{AppConfig, ConfigError, DeviceConfig};
pub use device::DeviceKind;
pub use record::{FlowFields, Label, NormalizedRecord, RecordType};
pub use rules::{RuleConfig, RuleEngine};
pub use sink::{SinkBuilder, SinkError, SinkHandles, SinkWriter};
pub use snmp::{SnmpClient, SnmpError};
