//! Template cache for NetFlow v9 and IPFIX.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Field length marking an IPFIX variable-length field.
pub const VARIABLE_LENGTH: u16 = 0xffff;

/// One field of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Information element / field type id.
    pub id: u16,
    /// Encoded length, or [`VARIABLE_LENGTH`].
    pub length: u16,
    /// Private enterprise number for enterprise-specific IPFIX elements.
    pub enterprise: Option<u32>,
}

impl FieldSpec {
    pub fn new(id: u16, length: u16) -> Self {
        Self {
            id,
            length,
            enterprise: None,
        }
    }
}

/// Record layout announced by an exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub fields: Vec<FieldSpec>,
    /// Options templates describe the exporter itself; their data is skipped.
    pub options: bool,
}

impl Template {
    pub fn data(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            options: false,
        }
    }

    pub fn options(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            options: true,
        }
    }

    /// Smallest possible record size (variable-length fields count one byte).
    pub fn min_record_len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| {
                if f.length == VARIABLE_LENGTH {
                    1
                } else {
                    usize::from(f.length)
                }
            })
            .sum()
    }
}

/// Cache key: templates are scoped per exporter and observation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub exporter: IpAddr,
    /// NetFlow v9 source id or IPFIX observation domain id.
    pub domain: u32,
    pub template_id: u16,
}

/// Templates learned from every exporter.
///
/// Without an idle timeout, entries live as long as the cache. With one,
/// all templates of an exporter are dropped once that exporter has been
/// silent for longer than the timeout.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: HashMap<TemplateKey, Template>,
    last_seen: HashMap<IpAddr, Instant>,
    idle_timeout: Option<Duration>,
}

impl TemplateCache {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            templates: HashMap::new(),
            last_seen: HashMap::new(),
            idle_timeout,
        }
    }

    pub fn get(&self, key: &TemplateKey) -> Option<&Template> {
        self.templates.get(key)
    }

    pub fn insert(&mut self, key: TemplateKey, template: Template, now: Instant) {
        self.last_seen.insert(key.exporter, now);
        self.templates.insert(key, template);
    }

    /// Template withdrawal.
    pub fn remove(&mut self, key: &TemplateKey) -> Option<Template> {
        self.templates.remove(key)
    }

    /// Record traffic from an exporter that already has templates.
    pub fn touch(&mut self, exporter: IpAddr, now: Instant) {
        if let Some(seen) = self.last_seen.get_mut(&exporter) {
            *seen = now;
        }
    }

    /// Drop templates of exporters idle for longer than the timeout.
    /// Returns the number of templates removed.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };

        let idle: Vec<IpAddr> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > timeout)
            .map(|(exporter, _)| *exporter)
            .collect();
        if idle.is_empty() {
            return 0;
        }

        let before = self.templates.len();
        for exporter in &idle {
            self.last_seen.remove(exporter);
            tracing::debug!(%exporter, "Evicting templates of idle exporter");
        }
        self.templates.retain(|key, _| !idle.contains(&key.exporter));
        before - self.templates.len()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
