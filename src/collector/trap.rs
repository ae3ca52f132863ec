//! SNMP notification ingestion (v1 traps, v2c traps and informs).

mod collector;
mod receiver;

pub use collector::{DEFAULT_TRAP_PORT, TrapCollector, TrapConfig};
pub use receiver::{Notification, TRAP_METRIC, UNKNOWN_SOURCE, on_notification};
