//! SNMP messages and PDUs.

use std::net::Ipv4Addr;

use crate::snmp::SnmpError;
use crate::snmp::ber::{
    Oid, Reader, TAG_INTEGER, TAG_IP_ADDRESS, TAG_OCTET_STRING, TAG_SEQUENCE, TAG_TIMETICKS,
    Value, decode_unsigned, encode_signed, encode_tlv, encode_unsigned,
};

/// Context tag of the SNMPv1 Trap-PDU.
const TAG_TRAP_V1: u8 = 0xA4;

/// Protocol version carried in the message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2c,
}

impl Version {
    fn wire(self) -> i64 {
        match self {
            Self::V1 => 0,
            Self::V2c => 1,
        }
    }

    fn from_wire(v: i64) -> Result<Self, SnmpError> {
        match v {
            0 => Ok(Self::V1),
            1 => Ok(Self::V2c),
            other => Err(SnmpError::UnsupportedVersion(other)),
        }
    }
}

/// PDU types sharing the request/response layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    Response,
    SetRequest,
    GetBulkRequest,
    InformRequest,
    SnmpV2Trap,
    Report,
}

impl PduType {
    fn tag(self) -> u8 {
        match self {
            Self::GetRequest => 0xA0,
            Self::GetNextRequest => 0xA1,
            Self::Response => 0xA2,
            Self::SetRequest => 0xA3,
            Self::GetBulkRequest => 0xA5,
            Self::InformRequest => 0xA6,
            Self::SnmpV2Trap => 0xA7,
            Self::Report => 0xA8,
        }
    }
}

impl TryFrom<u8> for PduType {
    type Error = SnmpError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0xA0 => Self::GetRequest,
            0xA1 => Self::GetNextRequest,
            0xA2 => Self::Response,
            0xA3 => Self::SetRequest,
            0xA5 => Self::GetBulkRequest,
            0xA6 => Self::InformRequest,
            0xA7 => Self::SnmpV2Trap,
            0xA8 => Self::Report,
            other => {
                return Err(SnmpError::Decode(format!("unknown PDU tag 0x{other:02x}")));
            }
        })
    }
}

/// One variable binding.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }
}

/// Request, response or v2 notification PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

/// SNMPv1 Trap-PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct TrapV1 {
    pub enterprise: Oid,
    pub agent_addr: Ipv4Addr,
    pub generic_trap: i64,
    pub specific_trap: i64,
    pub timestamp: u32,
    pub varbinds: Vec<VarBind>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PduBody {
    Pdu(Pdu),
    TrapV1(TrapV1),
}

/// Community-based SNMP message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: Version,
    pub community: Vec<u8>,
    pub body: PduBody,
}

impl Message {
    /// v2c GetRequest for `oids`.
    pub fn get_request(community: &[u8], request_id: i32, oids: &[Oid]) -> Self {
        Self {
            version: Version::V2c,
            community: community.to_vec(),
            body: PduBody::Pdu(Pdu {
                pdu_type: PduType::GetRequest,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds: oids
                    .iter()
                    .map(|oid| VarBind::new(oid.clone(), Value::Null))
                    .collect(),
            }),
        }
    }

    /// Response echoing an InformRequest, `None` for any other message.
    pub fn inform_ack(&self) -> Option<Self> {
        match &self.body {
            PduBody::Pdu(pdu) if pdu.pdu_type == PduType::InformRequest => Some(Self {
                version: self.version,
                community: self.community.clone(),
                body: PduBody::Pdu(Pdu {
                    pdu_type: PduType::Response,
                    error_status: 0,
                    error_index: 0,
                    ..pdu.clone()
                }),
            }),
            _ => None,
        }
    }

    pub fn varbinds(&self) -> &[VarBind] {
        match &self.body {
            PduBody::Pdu(pdu) => &pdu.varbinds,
            PduBody::TrapV1(trap) => &trap.varbinds,
        }
    }

    /// True for traps and informs.
    pub fn is_notification(&self) -> bool {
        match &self.body {
            PduBody::TrapV1(_) => true,
            PduBody::Pdu(pdu) => matches!(
                pdu.pdu_type,
                PduType::SnmpV2Trap | PduType::InformRequest
            ),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnmpError> {
        let mut body = Vec::new();
        encode_tlv(TAG_INTEGER, &encode_signed(self.version.wire()), &mut body);
        encode_tlv(TAG_OCTET_STRING, &self.community, &mut body);

        let mut pdu = Vec::new();
        let tag = match &self.body {
            PduBody::Pdu(p) => {
                encode_tlv(TAG_INTEGER, &encode_signed(i64::from(p.request_id)), &mut pdu);
                encode_tlv(TAG_INTEGER, &encode_signed(p.error_status), &mut pdu);
                encode_tlv(TAG_INTEGER, &encode_signed(p.error_index), &mut pdu);
                encode_varbinds(&p.varbinds, &mut pdu)?;
                p.pdu_type.tag()
            }
            PduBody::TrapV1(t) => {
                t.enterprise.encode(&mut pdu)?;
                encode_tlv(TAG_IP_ADDRESS, &t.agent_addr.octets(), &mut pdu);
                encode_tlv(TAG_INTEGER, &encode_signed(t.generic_trap), &mut pdu);
                encode_tlv(TAG_INTEGER, &encode_signed(t.specific_trap), &mut pdu);
                encode_tlv(
                    TAG_TIMETICKS,
                    &encode_unsigned(u64::from(t.timestamp)),
                    &mut pdu,
                );
                encode_varbinds(&t.varbinds, &mut pdu)?;
                TAG_TRAP_V1
            }
        };
        encode_tlv(tag, &pdu, &mut body);

        let mut out = Vec::with_capacity(body.len() + 4);
        encode_tlv(TAG_SEQUENCE, &body, &mut out);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnmpError> {
        let mut outer = Reader::new(bytes);
        let mut r = Reader::new(outer.expect(TAG_SEQUENCE)?);

        let version = Version::from_wire(r.integer()?)?;
        let community = r.expect(TAG_OCTET_STRING)?.to_vec();
        let (tag, content) = r.read_tlv()?;
        let mut p = Reader::new(content);

        let body = if tag == TAG_TRAP_V1 {
            let enterprise = p.oid()?;
            let addr: [u8; 4] = p
                .expect(TAG_IP_ADDRESS)?
                .try_into()
                .map_err(|_| SnmpError::Decode("agent-addr must be 4 bytes".to_string()))?;
            let generic_trap = p.integer()?;
            let specific_trap = p.integer()?;
            let timestamp = u32::try_from(decode_unsigned(p.expect(TAG_TIMETICKS)?)?)
                .map_err(|_| SnmpError::Decode("time-stamp exceeds 32 bits".to_string()))?;
            PduBody::TrapV1(TrapV1 {
                enterprise,
                agent_addr: Ipv4Addr::from(addr),
                generic_trap,
                specific_trap,
                timestamp,
                varbinds: decode_varbinds(&mut p)?,
            })
        } else {
            let pdu_type = PduType::try_from(tag)?;
            let request_id = i32::try_from(p.integer()?)
                .map_err(|_| SnmpError::Decode("request-id out of range".to_string()))?;
            PduBody::Pdu(Pdu {
                pdu_type,
                request_id,
                error_status: p.integer()?,
                error_index: p.integer()?,
                varbinds: decode_varbinds(&mut p)?,
            })
        };

        Ok(Self {
            version,
            community,
            body,
        })
    }
}

fn encode_varbinds(varbinds: &[VarBind], out: &mut Vec<u8>) -> Result<(), SnmpError> {
    let mut list = Vec::new();
    for vb in varbinds {
        let mut pair = Vec::new();
        vb.oid.encode(&mut pair)?;
        vb.value.encode(&mut pair)?;
        encode_tlv(TAG_SEQUENCE, &pair, &mut list);
    }
    encode_tlv(TAG_SEQUENCE, &list, out);
    Ok(())
}

fn decode_varbinds(r: &mut Reader<'_>) -> Result<Vec<VarBind>, SnmpError> {
    let mut list = Reader::new(r.expect(TAG_SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut pair = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = pair.oid()?;
        let (tag, content) = pair.read_tlv()?;
        varbinds.push(VarBind::new(oid, Value::decode(tag, content)?));
    }
    Ok(varbinds)
}
