//! Collector Layer
//!
//! Ingestion units that turn network telemetry into normalized records and
//! hand them to the sink. Each unit runs in its own Tokio task.
//!
//! # Architecture
//!
//! - [`Collector`]: Core trait for an ingestion unit
//! - [`Schedule`]: Continuous listener or fixed polling interval
//! - [`CollectorRegistry`]: Manages unit lifecycle and graceful shutdown
//! - [`flow`]: NetFlow v5/v9 and IPFIX listener
//! - [`trap`]: SNMP trap and inform listener
//! - [`poller`]: Periodic device poller
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sonar::{CollectorRegistry, FlowCollector, FlowConfig, RuleEngine, SinkBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = SinkBuilder::new("/tmp/sonar").build()?;
//! let rules = Arc::new(RuleEngine::default());
//! let flow = FlowCollector::bind(FlowConfig::default(), rules, handles.writer.clone()).await?;
//!
//! let registry = CollectorRegistry::new();
//! registry.spawn(flow).await;
//! registry.shutdown().await;
//! handles.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod flow;
pub mod poller;
mod registry;
mod traits;
pub mod trap;

pub use registry::{CollectorRegistry, DEFAULT_SHUTDOWN_TIMEOUT, JobInfo};
pub use traits::{Collector, CollectorError, MIN_INTERVAL, Schedule};
