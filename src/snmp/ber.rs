//! Minimal BER encoding for the SNMP subset used here.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::snmp::SnmpError;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_IP_ADDRESS: u8 = 0x40;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_OPAQUE: u8 = 0x44;
pub const TAG_COUNTER64: u8 = 0x46;
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;

// =============================================================================
// Object identifiers
// =============================================================================

/// Object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    /// Append one arc (e.g. an interface index).
    pub fn child(&self, arc: u32) -> Self {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Self(arcs)
    }

    /// Append the full OID TLV.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), SnmpError> {
        let mut content = Vec::with_capacity(self.0.len() + 2);
        self.encode_content(&mut content)?;
        encode_tlv(TAG_OID, &content, out);
        Ok(())
    }

    fn encode_content(&self, out: &mut Vec<u8>) -> Result<(), SnmpError> {
        let arcs = &self.0;
        if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
            return Err(SnmpError::Encode(format!("invalid oid {self}")));
        }
        let first = arcs[0]
            .checked_mul(40)
            .and_then(|v| v.checked_add(arcs[1]))
            .ok_or_else(|| SnmpError::Encode(format!("invalid oid {self}")))?;
        encode_base128(first, out);
        for &arc in &arcs[2..] {
            encode_base128(arc, out);
        }
        Ok(())
    }

    fn decode_content(content: &[u8]) -> Result<Self, SnmpError> {
        if content.is_empty() {
            return Err(SnmpError::Decode("empty oid".to_string()));
        }
        let mut arcs = Vec::with_capacity(content.len() + 1);
        let mut acc: u32 = 0;
        let mut first = true;
        for (i, &byte) in content.iter().enumerate() {
            acc = acc
                .checked_mul(128)
                .and_then(|v| v.checked_add(u32::from(byte & 0x7f)))
                .ok_or_else(|| SnmpError::Decode("oid arc overflow".to_string()))?;
            if byte & 0x80 == 0 {
                if first {
                    let (a, b) = match acc {
                        0..=39 => (0, acc),
                        40..=79 => (1, acc - 40),
                        _ => (2, acc - 80),
                    };
                    arcs.push(a);
                    arcs.push(b);
                    first = false;
                } else {
                    arcs.push(acc);
                }
                acc = 0;
            } else if i == content.len() - 1 {
                return Err(SnmpError::Decode("truncated oid arc".to_string()));
            }
        }
        Ok(Self(arcs))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.0.iter();
        if let Some(first) = iter.next() {
            write!(f, "{first}")?;
        }
        for arc in iter {
            write!(f, ".{arc}")?;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    /// Parse dotted notation; a leading dot is accepted (`.1.3.6.1.2.1.1.3.0`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(SnmpError::InvalidOid(s.to_string()));
        }
        let arcs = trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SnmpError::InvalidOid(s.to_string()))?;
        if arcs.len() < 2 {
            return Err(SnmpError::InvalidOid(s.to_string()));
        }
        Ok(Self(arcs))
    }
}

// =============================================================================
// Values
// =============================================================================

/// SNMP variable-binding value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress(Ipv4Addr),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    /// True for `Null` and the v2c exception values, which carry no data.
    pub fn is_empty_response(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::NoSuchObject | Self::NoSuchInstance | Self::EndOfMibView
        )
    }

    /// Text rendering used for record values and trap messages.
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), SnmpError> {
        match self {
            Self::Integer(v) => encode_tlv(TAG_INTEGER, &encode_signed(*v), out),
            Self::OctetString(b) => encode_tlv(TAG_OCTET_STRING, b, out),
            Self::Null => encode_tlv(TAG_NULL, &[], out),
            Self::ObjectId(oid) => oid.encode(out)?,
            Self::IpAddress(ip) => encode_tlv(TAG_IP_ADDRESS, &ip.octets(), out),
            Self::Counter32(v) => encode_tlv(TAG_COUNTER32, &encode_unsigned(u64::from(*v)), out),
            Self::Gauge32(v) => encode_tlv(TAG_GAUGE32, &encode_unsigned(u64::from(*v)), out),
            Self::TimeTicks(v) => encode_tlv(TAG_TIMETICKS, &encode_unsigned(u64::from(*v)), out),
            Self::Opaque(b) => encode_tlv(TAG_OPAQUE, b, out),
            Self::Counter64(v) => encode_tlv(TAG_COUNTER64, &encode_unsigned(*v), out),
            Self::NoSuchObject => encode_tlv(TAG_NO_SUCH_OBJECT, &[], out),
            Self::NoSuchInstance => encode_tlv(TAG_NO_SUCH_INSTANCE, &[], out),
            Self::EndOfMibView => encode_tlv(TAG_END_OF_MIB_VIEW, &[], out),
        }
        Ok(())
    }

    pub fn decode(tag: u8, content: &[u8]) -> Result<Self, SnmpError> {
        Ok(match tag {
            TAG_INTEGER => Self::Integer(decode_signed(content)?),
            TAG_OCTET_STRING => Self::OctetString(content.to_vec()),
            TAG_NULL => Self::Null,
            TAG_OID => Self::ObjectId(Oid::decode_content(content)?),
            TAG_IP_ADDRESS => {
                let octets: [u8; 4] = content
                    .try_into()
                    .map_err(|_| SnmpError::Decode("ip address must be 4 bytes".to_string()))?;
                Self::IpAddress(Ipv4Addr::from(octets))
            }
            TAG_COUNTER32 => Self::Counter32(narrow(decode_unsigned(content)?)?),
            TAG_GAUGE32 => Self::Gauge32(narrow(decode_unsigned(content)?)?),
            TAG_TIMETICKS => Self::TimeTicks(narrow(decode_unsigned(content)?)?),
            TAG_OPAQUE => Self::Opaque(content.to_vec()),
            TAG_COUNTER64 => Self::Counter64(decode_unsigned(content)?),
            TAG_NO_SUCH_OBJECT => Self::NoSuchObject,
            TAG_NO_SUCH_INSTANCE => Self::NoSuchInstance,
            TAG_END_OF_MIB_VIEW => Self::EndOfMibView,
            other => {
                return Err(SnmpError::Decode(format!(
                    "unsupported value tag 0x{other:02x}"
                )));
            }
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::OctetString(b) => match std::str::from_utf8(b) {
                Ok(s) if s.chars().all(|c| !c.is_control() || c.is_whitespace()) => {
                    write!(f, "{s}")
                }
                _ => write_hex(f, b),
            },
            Self::Null => Ok(()),
            Self::ObjectId(oid) => write!(f, "{oid}"),
            Self::IpAddress(ip) => write!(f, "{ip}"),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => write!(f, "{v}"),
            Self::Opaque(b) => write_hex(f, b),
            Self::Counter64(v) => write!(f, "{v}"),
            Self::NoSuchObject => write!(f, "No Such Object currently exists at this OID"),
            Self::NoSuchInstance => write!(f, "No Such Instance currently exists at this OID"),
            Self::EndOfMibView => write!(f, "No more variables left in this MIB View"),
        }
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    write!(f, "0x")?;
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

fn narrow(v: u64) -> Result<u32, SnmpError> {
    u32::try_from(v).map_err(|_| SnmpError::Decode(format!("value {v} exceeds 32 bits")))
}

// =============================================================================
// TLV primitives
// =============================================================================

/// Append a TLV with definite length.
pub fn encode_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    encode_length(content.len(), out);
    out.extend_from_slice(content);
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn encode_base128(mut v: u32, out: &mut Vec<u8>) {
    let mut tmp = [0u8; 5];
    let mut n = 0;
    loop {
        tmp[n] = (v & 0x7f) as u8;
        n += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        out.push(if i == 0 { tmp[i] } else { tmp[i] | 0x80 });
    }
}

/// Minimal two's-complement encoding.
pub fn encode_signed(v: i64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

/// Minimal unsigned encoding with a leading zero when the high bit is set.
pub fn encode_unsigned(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    let mut out = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[skip..]);
    out
}

pub fn decode_signed(content: &[u8]) -> Result<i64, SnmpError> {
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::Decode(format!(
            "integer of {} bytes",
            content.len()
        )));
    }
    let mut v: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in content {
        v = (v << 8) | i64::from(b);
    }
    Ok(v)
}

pub fn decode_unsigned(content: &[u8]) -> Result<u64, SnmpError> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::Decode(format!(
            "unsigned of {} bytes",
            content.len()
        )));
    }
    Ok(content.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Cursor over a BER buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Read the next TLV, returning its tag and content.
    pub fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), SnmpError> {
        let tag = self.byte()?;
        let first = self.byte()?;
        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let n = usize::from(first & 0x7f);
            if n == 0 || n > 4 {
                return Err(SnmpError::Decode(format!("unsupported length form 0x{first:02x}")));
            }
            let mut len = 0usize;
            for _ in 0..n {
                len = (len << 8) | usize::from(self.byte()?);
            }
            len
        };
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| SnmpError::Decode(format!("length {len} overruns buffer")))?;
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    /// Read a TLV and require `tag`.
    pub fn expect(&mut self, tag: u8) -> Result<&'a [u8], SnmpError> {
        let (got, content) = self.read_tlv()?;
        if got != tag {
            return Err(SnmpError::Decode(format!(
                "expected tag 0x{tag:02x}, found 0x{got:02x}"
            )));
        }
        Ok(content)
    }

    pub fn integer(&mut self) -> Result<i64, SnmpError> {
        decode_signed(self.expect(TAG_INTEGER)?)
    }

    pub fn oid(&mut self) -> Result<Oid, SnmpError> {
        Oid::decode_content(self.expect(TAG_OID)?)
    }

    fn byte(&mut self) -> Result<u8, SnmpError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| SnmpError::Decode("unexpected end of buffer".to_string()))?;
        self.pos += 1;
        Ok(b)
    }
}
