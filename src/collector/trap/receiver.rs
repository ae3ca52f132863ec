//! Notification to record conversion.

use std::str::FromStr;

use chrono::{DateTime, Local};

use crate::record::{NormalizedRecord, RecordType};
use crate::snmp::{Message, Oid, PduBody, SNMP_TRAP_ADDRESS, SNMP_TRAP_OID, SYS_UPTIME, TrapV1, Value, VarBind};

/// Metric name of every trap record.
pub const TRAP_METRIC: &str = "trap";

/// Source used when a notification does not identify its sender.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// `snmpTraps`: base of the generic trap OIDs (coldStart = .1, ...).
const SNMP_TRAPS: &str = "1.3.6.1.6.3.1.1.5";

/// Separator between rendered bindings.
const BINDING_SEPARATOR: &str = " | ";

/// One inbound trap or inform.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Sender identity carried in the payload, if any.
    pub source: Option<String>,
    pub community: String,
    pub bindings: Vec<VarBind>,
}

impl Notification {
    /// Extract a notification, `None` for requests and responses.
    ///
    /// v1 traps are presented in v2 form: `sysUpTime.0` and `snmpTrapOID.0`
    /// lead the bindings, and the agent address is the source.
    pub fn from_message(message: &Message) -> Option<Self> {
        if !message.is_notification() {
            return None;
        }
        let community = String::from_utf8_lossy(&message.community).into_owned();

        let (source, bindings) = match &message.body {
            PduBody::TrapV1(trap) => (Some(trap.agent_addr.to_string()), v1_bindings(trap)),
            PduBody::Pdu(pdu) => (trap_address(&pdu.varbinds), pdu.varbinds.clone()),
        };

        Some(Self {
            source,
            community,
            bindings,
        })
    }
}

fn trap_address(bindings: &[VarBind]) -> Option<String> {
    let wanted = Oid::from_str(SNMP_TRAP_ADDRESS).ok()?;
    bindings.iter().find_map(|vb| match &vb.value {
        Value::IpAddress(ip) if vb.oid == wanted => Some(ip.to_string()),
        _ => None,
    })
}

fn v1_bindings(trap: &TrapV1) -> Vec<VarBind> {
    let trap_oid = if (0..6).contains(&trap.generic_trap) {
        Oid::from_str(SNMP_TRAPS)
            .ok()
            .map(|base| base.child(trap.generic_trap as u32 + 1))
    } else {
        u32::try_from(trap.specific_trap)
            .ok()
            .map(|specific| trap.enterprise.child(0).child(specific))
    };

    let mut bindings = Vec::with_capacity(trap.varbinds.len() + 2);
    if let Ok(uptime) = Oid::from_str(SYS_UPTIME) {
        bindings.push(VarBind::new(uptime, Value::TimeTicks(trap.timestamp)));
    }
    if let (Ok(oid), Some(value)) = (Oid::from_str(SNMP_TRAP_OID), trap_oid) {
        bindings.push(VarBind::new(oid, Value::ObjectId(value)));
    }
    bindings.extend(trap.varbinds.iter().cloned());
    bindings
}

/// Build the trap record for one notification.
///
/// No rules run on traps: the record is never labeled and carries no value.
pub fn on_notification(
    source: Option<&str>,
    bindings: &[VarBind],
    timestamp: DateTime<Local>,
) -> NormalizedRecord {
    let source = source.unwrap_or(UNKNOWN_SOURCE);

    tracing::info!(source, bindings = bindings.len(), "Received trap");
    for vb in bindings {
        tracing::debug!(source, oid = %vb.oid, value = %vb.value, "Trap binding");
    }

    let message = bindings
        .iter()
        .map(|vb| format!("{} = {}", vb.oid, vb.value))
        .collect::<Vec<_>>()
        .join(BINDING_SEPARATOR);

    NormalizedRecord::new(timestamp, source, RecordType::SnmpTrap, TRAP_METRIC, None)
        .with_message(message)
}
