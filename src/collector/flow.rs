//! Flow export ingestion (NetFlow v5/v9, IPFIX).

mod collector;
mod decoder;
mod template;

pub use collector::{DEFAULT_FLOW_PORT, FlowCollector, FlowConfig};
pub use decoder::{DecodedPacket, FLOW_METRIC, FlowDecoder, FlowError};
pub use template::{FieldSpec, Template, TemplateCache, TemplateKey};
