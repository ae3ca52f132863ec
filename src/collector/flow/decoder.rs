//! Flow export packet decoding (NetFlow v5, NetFlow v9, IPFIX).
//!
//! Decoding is stateful only through the [`TemplateCache`]: template sets
//! update it in place and data sets are resolved against it. Data that
//! references a template the cache has never seen is dropped without error.

use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::collector::flow::template::{
    FieldSpec, Template, TemplateCache, TemplateKey, VARIABLE_LENGTH,
};
use crate::record::{FlowFields, NormalizedRecord, RecordType};
use crate::rules::{RuleEngine, Subject};

/// Metric name of every flow record.
pub const FLOW_METRIC: &str = "flow";

const V5_HEADER_LEN: usize = 24;
const V5_RECORD_LEN: usize = 48;
const V5_MAX_RECORDS: usize = 30;
const V9_HEADER_LEN: usize = 20;
const IPFIX_HEADER_LEN: usize = 16;
const SET_HEADER_LEN: usize = 4;
const MIN_DATA_SET_ID: u16 = 256;

const V9_TEMPLATE_SET: u16 = 0;
const V9_OPTIONS_TEMPLATE_SET: u16 = 1;
const IPFIX_TEMPLATE_SET: u16 = 2;
const IPFIX_OPTIONS_TEMPLATE_SET: u16 = 3;

// Field type ids shared by NetFlow v9 and IPFIX.
const FIELD_OCTETS: u16 = 1;
const FIELD_PACKETS: u16 = 2;
const FIELD_PROTOCOL: u16 = 4;
const FIELD_SRC_PORT: u16 = 7;
const FIELD_SRC_ADDR: u16 = 8;
const FIELD_DST_PORT: u16 = 11;
const FIELD_DST_ADDR: u16 = 12;

const ENTERPRISE_BIT: u16 = 0x8000;

/// Packet-level decode failure.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("truncated {context}: need {needed} bytes, {available} available")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("unsupported export version {0}")]
    UnsupportedVersion(u16),

    #[error("malformed packet: {0}")]
    Malformed(String),
}

/// Result of decoding one packet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPacket {
    pub version: u16,
    pub flows: Vec<FlowFields>,
    /// Templates learned or withdrawn by this packet.
    pub template_updates: usize,
    /// Data sets skipped because their template is unknown.
    pub unknown_sets: usize,
}

// ===== Byte helpers =====

fn slice<'a>(
    data: &'a [u8],
    offset: usize,
    len: usize,
    context: &'static str,
) -> Result<&'a [u8], FlowError> {
    data.get(offset..offset.saturating_add(len))
        .ok_or(FlowError::Truncated {
            context,
            needed: offset.saturating_add(len),
            available: data.len(),
        })
}

fn be_u16(data: &[u8], offset: usize, context: &'static str) -> Result<u16, FlowError> {
    let b = slice(data, offset, 2, context)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], offset: usize, context: &'static str) -> Result<u32, FlowError> {
    let b = slice(data, offset, 4, context)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Big-endian unsigned of 1 to 8 bytes.
fn be_uint(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

fn set_field(flow: &mut FlowFields, id: u16, value: &[u8]) {
    match id {
        FIELD_OCTETS => flow.octets = be_uint(value),
        FIELD_PACKETS => flow.packets = be_uint(value),
        FIELD_PROTOCOL => flow.protocol = be_uint(value).and_then(|v| u8::try_from(v).ok()),
        FIELD_SRC_PORT => flow.src_port = be_uint(value).and_then(|v| u16::try_from(v).ok()),
        FIELD_DST_PORT => flow.dst_port = be_uint(value).and_then(|v| u16::try_from(v).ok()),
        FIELD_SRC_ADDR => flow.src_addr = ipv4(value),
        FIELD_DST_ADDR => flow.dst_addr = ipv4(value),
        _ => {}
    }
}

fn ipv4(value: &[u8]) -> Option<Ipv4Addr> {
    <[u8; 4]>::try_from(value).ok().map(Ipv4Addr::from)
}

// ===== Decoder =====

/// Stateful decoder owning the template cache.
#[derive(Debug)]
pub struct FlowDecoder {
    templates: TemplateCache,
    rules: Arc<RuleEngine>,
}

impl FlowDecoder {
    pub fn new(templates: TemplateCache, rules: Arc<RuleEngine>) -> Self {
        Self { templates, rules }
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    /// Decode one packet into labeled FLOW records.
    ///
    /// Never fails: a malformed packet is logged and yields no records.
    pub fn decode(
        &mut self,
        data: &[u8],
        exporter: IpAddr,
        timestamp: DateTime<Local>,
    ) -> Vec<NormalizedRecord> {
        let packet = match self.decode_packet(data, exporter) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(%exporter, bytes = data.len(), error = %e, "Failed to decode flow packet");
                return Vec::new();
            }
        };

        let count = packet.flows.len();
        packet
            .flows
            .iter()
            .enumerate()
            .map(|(i, flow)| {
                let mut record = NormalizedRecord::new(
                    timestamp,
                    exporter.to_string(),
                    RecordType::Flow,
                    FLOW_METRIC,
                    flow.packets.map(|p| p as f64),
                )
                .with_message(describe(i + 1, count, packet.version, flow));
                self.rules.label(&mut record, Subject::Flow(flow));
                record
            })
            .collect()
    }

    /// Decode one packet into raw flow fields, updating the template cache.
    pub fn decode_packet(
        &mut self,
        data: &[u8],
        exporter: IpAddr,
    ) -> Result<DecodedPacket, FlowError> {
        let now = Instant::now();
        self.templates.evict_idle(now);
        self.templates.touch(exporter, now);

        let version = be_u16(data, 0, "header")?;
        let packet = match version {
            5 => decode_v5(data)?,
            9 => self.decode_v9(data, exporter, now)?,
            10 => self.decode_ipfix(data, exporter, now)?,
            other => return Err(FlowError::UnsupportedVersion(other)),
        };

        if packet.unknown_sets > 0 {
            tracing::debug!(
                %exporter,
                version,
                sets = packet.unknown_sets,
                "Dropped flow data referencing unknown templates"
            );
        }
        Ok(packet)
    }

    fn decode_v9(
        &mut self,
        data: &[u8],
        exporter: IpAddr,
        now: Instant,
    ) -> Result<DecodedPacket, FlowError> {
        slice(data, 0, V9_HEADER_LEN, "v9 header")?;
        let domain = be_u32(data, 16, "v9 header")?;
        self.decode_sets(data, V9_HEADER_LEN, 9, exporter, domain, now)
    }

    fn decode_ipfix(
        &mut self,
        data: &[u8],
        exporter: IpAddr,
        now: Instant,
    ) -> Result<DecodedPacket, FlowError> {
        slice(data, 0, IPFIX_HEADER_LEN, "IPFIX header")?;
        let length = usize::from(be_u16(data, 2, "IPFIX header")?);
        if length < IPFIX_HEADER_LEN {
            return Err(FlowError::Malformed(format!("IPFIX message length {length}")));
        }
        let data = slice(data, 0, length, "IPFIX message")?;
        let domain = be_u32(data, 12, "IPFIX header")?;
        self.decode_sets(data, IPFIX_HEADER_LEN, 10, exporter, domain, now)
    }

    fn decode_sets(
        &mut self,
        data: &[u8],
        mut offset: usize,
        version: u16,
        exporter: IpAddr,
        domain: u32,
        now: Instant,
    ) -> Result<DecodedPacket, FlowError> {
        let ipfix = version == 10;
        let mut packet = DecodedPacket {
            version,
            ..Default::default()
        };

        while offset + SET_HEADER_LEN <= data.len() {
            let set_id = be_u16(data, offset, "set header")?;
            let set_len = usize::from(be_u16(data, offset + 2, "set header")?);
            if set_len < SET_HEADER_LEN {
                return Err(FlowError::Malformed(format!(
                    "set {set_id} has length {set_len}"
                )));
            }
            let body = slice(data, offset + SET_HEADER_LEN, set_len - SET_HEADER_LEN, "set")?;
            let key = |template_id| TemplateKey {
                exporter,
                domain,
                template_id,
            };

            match (set_id, ipfix) {
                (V9_TEMPLATE_SET, false) | (IPFIX_TEMPLATE_SET, true) => {
                    for (template_id, template) in parse_templates(body, ipfix, false)? {
                        self.store(key(template_id), template, now);
                        packet.template_updates += 1;
                    }
                }
                (V9_OPTIONS_TEMPLATE_SET, false) | (IPFIX_OPTIONS_TEMPLATE_SET, true) => {
                    let templates = if ipfix {
                        parse_templates(body, true, true)?
                    } else {
                        parse_v9_options_templates(body)?
                    };
                    for (template_id, template) in templates {
                        self.store(key(template_id), template, now);
                        packet.template_updates += 1;
                    }
                }
                (id, _) if id >= MIN_DATA_SET_ID => match self.templates.get(&key(id)) {
                    Some(template) if template.options => {}
                    Some(template) => decode_data_set(template, body, &mut packet.flows)?,
                    None => packet.unknown_sets += 1,
                },
                (id, _) => {
                    tracing::debug!(%exporter, set_id = id, "Skipping reserved set id");
                }
            }

            offset += set_len;
        }

        Ok(packet)
    }

    /// Insert a template, or withdraw it when it has no fields.
    fn store(&mut self, key: TemplateKey, template: Template, now: Instant) {
        if template.fields.is_empty() {
            self.templates.remove(&key);
        } else {
            self.templates.insert(key, template, now);
        }
    }
}

fn decode_v5(data: &[u8]) -> Result<DecodedPacket, FlowError> {
    let count = usize::from(be_u16(data, 2, "v5 header")?);
    if count > V5_MAX_RECORDS {
        return Err(FlowError::Malformed(format!("v5 record count {count}")));
    }
    slice(data, 0, V5_HEADER_LEN + count * V5_RECORD_LEN, "v5 records")?;

    let flows = (0..count)
        .map(|i| {
            let r = &data[V5_HEADER_LEN + i * V5_RECORD_LEN..][..V5_RECORD_LEN];
            FlowFields {
                src_addr: ipv4(&r[0..4]),
                dst_addr: ipv4(&r[4..8]),
                packets: be_uint(&r[16..20]),
                octets: be_uint(&r[20..24]),
                src_port: Some(u16::from_be_bytes([r[32], r[33]])),
                dst_port: Some(u16::from_be_bytes([r[34], r[35]])),
                protocol: Some(r[38]),
            }
        })
        .collect();

    Ok(DecodedPacket {
        version: 5,
        flows,
        ..Default::default()
    })
}

/// Parse a NetFlow v9 template set or an IPFIX (options) template set.
///
/// A record with a template id below 256 is treated as set padding.
fn parse_templates(
    body: &[u8],
    ipfix: bool,
    options: bool,
) -> Result<Vec<(u16, Template)>, FlowError> {
    let mut out = Vec::new();
    let mut p = 0;

    while p + 4 <= body.len() {
        let template_id = be_u16(body, p, "template header")?;
        let field_count = usize::from(be_u16(body, p + 2, "template header")?);
        if template_id < MIN_DATA_SET_ID {
            break;
        }
        p += 4;

        if field_count == 0 {
            out.push((template_id, Template::data(Vec::new())));
            continue;
        }
        if options {
            // scope field count; scope fields are decoded like any other field
            be_u16(body, p, "options template header")?;
            p += 2;
        }

        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let raw_id = be_u16(body, p, "template field")?;
            let length = be_u16(body, p + 2, "template field")?;
            p += 4;
            let field = if ipfix && raw_id & ENTERPRISE_BIT != 0 {
                let pen = be_u32(body, p, "enterprise number")?;
                p += 4;
                FieldSpec {
                    id: raw_id & !ENTERPRISE_BIT,
                    length,
                    enterprise: Some(pen),
                }
            } else {
                FieldSpec::new(raw_id, length)
            };
            if !ipfix && field.length == VARIABLE_LENGTH {
                return Err(FlowError::Malformed(format!(
                    "variable-length field {} in v9 template {template_id}",
                    field.id
                )));
            }
            fields.push(field);
        }

        let template = if options {
            Template::options(fields)
        } else {
            Template::data(fields)
        };
        out.push((template_id, template));
    }

    Ok(out)
}

/// NetFlow v9 options templates carry scope and option lengths in bytes.
fn parse_v9_options_templates(body: &[u8]) -> Result<Vec<(u16, Template)>, FlowError> {
    let mut out = Vec::new();
    let mut p = 0;

    while p + 6 <= body.len() {
        let template_id = be_u16(body, p, "options template header")?;
        if template_id < MIN_DATA_SET_ID {
            break;
        }
        let scope_len = usize::from(be_u16(body, p + 2, "options template header")?);
        let option_len = usize::from(be_u16(body, p + 4, "options template header")?);
        p += 6;

        let total = scope_len + option_len;
        if total % 4 != 0 {
            return Err(FlowError::Malformed(format!(
                "options template {template_id} field bytes {total}"
            )));
        }
        let raw = slice(body, p, total, "options template fields")?;
        let fields = raw
            .chunks_exact(4)
            .map(|c| {
                FieldSpec::new(
                    u16::from_be_bytes([c[0], c[1]]),
                    u16::from_be_bytes([c[2], c[3]]),
                )
            })
            .collect();
        p += total;
        out.push((template_id, Template::options(fields)));
    }

    Ok(out)
}

/// Decode every record of a data set. Trailing bytes shorter than the
/// smallest record are padding.
fn decode_data_set(
    template: &Template,
    body: &[u8],
    flows: &mut Vec<FlowFields>,
) -> Result<(), FlowError> {
    let min_len = template.min_record_len();
    if min_len == 0 {
        return Ok(());
    }

    let mut p = 0;
    while body.len() - p >= min_len {
        let mut flow = FlowFields::default();
        for field in &template.fields {
            let len = if field.length == VARIABLE_LENGTH {
                let short = *body.get(p).ok_or(FlowError::Truncated {
                    context: "variable-length field",
                    needed: p + 1,
                    available: body.len(),
                })?;
                p += 1;
                if short == 255 {
                    let long = usize::from(be_u16(body, p, "variable-length field")?);
                    p += 2;
                    long
                } else {
                    usize::from(short)
                }
            } else {
                usize::from(field.length)
            };
            let value = slice(body, p, len, "data record")?;
            p += len;
            if field.enterprise.is_none() {
                set_field(&mut flow, field.id, value);
            }
        }
        flows.push(flow);
    }

    Ok(())
}

fn describe(idx: usize, count: usize, version: u16, flow: &FlowFields) -> String {
    format!(
        "Flow {idx}/{count}, Ver:{version}, Src:{}:{} -> {}:{}, Pkts:{}, Bytes:{}, Proto:{}",
        show(flow.src_addr),
        show(flow.src_port),
        show(flow.dst_addr),
        show(flow.dst_port),
        show(flow.packets),
        show(flow.octets),
        show(flow.protocol),
    )
}

fn show<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
