//! SNMP v1/v2c wire support.
//!
//! Only what the ingestion paths need is implemented:
//! - `ber`: BER primitives, object identifiers and variable-binding values
//! - `pdu`: messages, request/response PDUs and v1 traps
//! - `client`: async GET client with timeout and retries

mod ber;
mod client;
mod pdu;

use std::net::SocketAddr;

use thiserror::Error;

pub use ber::{Oid, Value};
pub use client::SnmpClient;
pub use pdu::{Message, Pdu, PduBody, PduType, TrapV1, VarBind, Version};

/// `snmpTrapAddress.0`: agent address carried inside v2c notifications.
pub const SNMP_TRAP_ADDRESS: &str = "1.3.6.1.6.3.18.1.3.0";

/// `sysUpTime.0`.
pub const SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";

/// `snmpTrapOID.0`.
pub const SNMP_TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";

/// SNMP codec and transport errors.
#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Invalid OID: {0}")]
    InvalidOid(String),

    #[error("Unsupported SNMP version {0}")]
    UnsupportedVersion(i64),

    #[error("No response from {agent} after {attempts} attempt(s)")]
    Timeout { agent: SocketAddr, attempts: u32 },

    #[error("Agent returned error-status {status} (index {index})")]
    ErrorStatus { status: i64, index: i64 },

    #[error("Empty response for {oid}")]
    EmptyResponse { oid: String },
}
