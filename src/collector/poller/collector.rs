//! Device poller.
//!
//! Polls every configured metric of every device once per interval, derives
//! kind-specific metrics, computes interface rates and classifies each value
//! before it is written.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;

use crate::collector::poller::{
    Counter, CounterSource, FetchError, MetricSource, RateState, ShellCounters, SnmpCounters,
    parse_numeric, try_parse_numeric,
};
use crate::collector::{Collector, CollectorError, Schedule};
use crate::config::{CounterConfig, DeviceConfig};
use crate::device::{Derived, DeviceKind};
use crate::record::{NormalizedRecord, RecordType};
use crate::rules::{Classification, RX_RATE, RuleEngine, Subject, TX_RATE};
use crate::sink::SinkWriter;
use crate::snmp::{Oid, SnmpClient};

/// Default polling interval (5 seconds).
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default per-query timeout (2 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default retries after a timed-out query.
const DEFAULT_RETRIES: u32 = 1;

/// Value recorded when an agent answers with something that is not a number.
const UNPARSED_DEFAULT: f64 = 0.0;

/// Default SNMP agent port.
pub const DEFAULT_AGENT_PORT: u16 = 161;

fn default_enabled() -> bool {
    true
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_port() -> u16 {
    DEFAULT_AGENT_PORT
}

/// Configuration for the device poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Enable polling (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Cycle interval, also the rate divisor (default: 5s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Per-query timeout (default: 2s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Retries after a timed-out query, 0 or 1 (default: 1).
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Agent port used when a device does not set one (default: 161).
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            port: DEFAULT_AGENT_PORT,
        }
    }
}

impl PollerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A device as seen by the poller.
pub struct PolledDevice {
    pub name: String,
    pub kind: DeviceKind,
    metrics: Vec<(String, Oid)>,
    source: Arc<dyn MetricSource>,
    counters: Option<Box<dyn CounterSource>>,
}

impl std::fmt::Debug for PolledDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolledDevice")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("metrics", &self.metrics.len())
            .field("counters", &self.counters.as_ref().map(|c| c.describe()))
            .finish_non_exhaustive()
    }
}

impl PolledDevice {
    pub fn new(name: impl Into<String>, kind: DeviceKind, source: Arc<dyn MetricSource>) -> Self {
        Self {
            name: name.into(),
            kind,
            metrics: Vec::new(),
            source,
            counters: None,
        }
    }

    /// Build an SNMP-polled device from its inventory entry.
    pub fn from_config(device: &DeviceConfig, poller: &PollerConfig) -> Result<Self, CollectorError> {
        let agent = SocketAddr::new(device.address, device.port.unwrap_or(poller.port));
        let source: Arc<dyn MetricSource> = Arc::new(SnmpClient::new(
            agent,
            device.community.clone(),
            poller.timeout,
            poller.retries,
        ));

        let mut polled = Self::new(device.name.clone(), device.kind, source.clone());
        for (metric, oid) in &device.metrics {
            let oid = oid.parse::<Oid>().map_err(|e| {
                CollectorError::Config(format!("device {}: metric {metric}: {e}", device.name))
            })?;
            polled = polled.with_metric(metric.clone(), oid);
        }

        let counters: Option<Box<dyn CounterSource>> = match &device.counters {
            None => None,
            Some(CounterConfig::Snmp { if_index }) => Some(Box::new(
                SnmpCounters::new(source, *if_index).map_err(counter_config_error(device))?,
            )),
            Some(CounterConfig::Shell {
                interface,
                user,
                command,
                timeout,
            }) => {
                let timeout = timeout.unwrap_or(poller.timeout);
                let shell = match command {
                    Some(command) => ShellCounters::from_command(
                        command,
                        device.address,
                        user.as_deref(),
                        interface.clone(),
                        timeout,
                    ),
                    None => {
                        ShellCounters::ssh(device.address, user.as_deref(), interface.clone(), timeout)
                    }
                }
                .map_err(counter_config_error(device))?;
                Some(Box::new(shell))
            }
        };
        polled.counters = counters;

        Ok(polled)
    }

    pub fn with_metric(mut self, metric: impl Into<String>, oid: Oid) -> Self {
        self.metrics.push((metric.into(), oid));
        self
    }

    pub fn with_counters(mut self, counters: impl CounterSource + 'static) -> Self {
        self.counters = Some(Box::new(counters));
        self
    }

    fn oid_of(&self, metric: &str) -> Option<&Oid> {
        self.metrics
            .iter()
            .find(|(name, _)| name == metric)
            .map(|(_, oid)| oid)
    }

    fn record(&self, timestamp: DateTime<Local>, metric: &str, value: Option<f64>) -> NormalizedRecord {
        NormalizedRecord::new(timestamp, self.name.clone(), RecordType::SnmpPoll, metric, value)
    }
}

fn counter_config_error(device: &DeviceConfig) -> impl Fn(FetchError) -> CollectorError + '_ {
    move |e| CollectorError::Config(format!("device {}: counters: {e}", device.name))
}

/// Interval-driven poller over the whole inventory.
pub struct DevicePoller {
    devices: Vec<PolledDevice>,
    rates: Mutex<RateState>,
    rules: Arc<RuleEngine>,
    interval: Duration,
    writer: Option<SinkWriter>,
}

impl std::fmt::Debug for DevicePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePoller")
            .field("devices", &self.devices)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl DevicePoller {
    pub fn new(devices: Vec<PolledDevice>, rules: Arc<RuleEngine>, interval: Duration) -> Self {
        Self {
            devices,
            rates: Mutex::new(RateState::new()),
            rules,
            interval,
            writer: None,
        }
    }

    /// Attach the sink writer used by [`Collector::run`].
    pub fn with_writer(mut self, writer: SinkWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Query every metric of every device once.
    ///
    /// Queries run one after another. A failed query yields a record with an
    /// empty value and never stops the remaining metrics or devices.
    pub async fn poll_cycle(&self, now: DateTime<Local>) -> Vec<NormalizedRecord> {
        let mut records = Vec::new();
        for device in &self.devices {
            self.poll_device(device, now, &mut records).await;
        }
        records
    }

    async fn poll_device(
        &self,
        device: &PolledDevice,
        now: DateTime<Local>,
        out: &mut Vec<NormalizedRecord>,
    ) {
        for (metric, oid) in &device.metrics {
            let raw = match device.source.fetch(oid).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(device = %device.name, metric = %metric, oid = %oid, error = %e, "Query failed");
                    out.push(
                        device
                            .record(now, metric, None)
                            .with_message(format!("SNMP polling returned no value for {oid}: {e}")),
                    );
                    continue;
                }
            };

            let mut record = device.record(now, metric, None);
            let value = match try_parse_numeric(&raw) {
                Some(value) => value,
                None => {
                    tracing::warn!(device = %device.name, metric = %metric, oid = %oid, raw = %raw, "Unparseable value");
                    record.append_message(&format!(
                        "Could not convert '{raw}' to a number, defaulting to {UNPARSED_DEFAULT}"
                    ));
                    parse_numeric(&raw, UNPARSED_DEFAULT)
                }
            };
            record.value = Some(value);

            // Derived classifications also mark the raw row they were computed from.
            for derived in device.kind.profile().derive(metric, value) {
                if let Some((derived_record, classification)) = self.derive(device, derived, now).await {
                    out.push(derived_record);
                    classification.apply(&mut record);
                }
            }

            self.rules.label(
                &mut record,
                Subject::Metric {
                    kind: device.kind,
                    name: metric,
                    value,
                },
            );
            out.push(record);
        }

        if let Some(counters) = &device.counters {
            self.poll_counters(device, counters.as_ref(), now, out).await;
        }
    }

    /// Compute one derived metric, returning its record and classification.
    async fn derive(
        &self,
        device: &PolledDevice,
        derived: Derived,
        now: DateTime<Local>,
    ) -> Option<(NormalizedRecord, Classification)> {
        let (metric, value) = match derived {
            Derived::Direct { metric, value } => (metric, value),
            Derived::Percentage {
                metric,
                numerator,
                denominator,
            } => {
                let Some(oid) = device.oid_of(denominator) else {
                    tracing::debug!(device = %device.name, metric, denominator, "Denominator not configured");
                    return None;
                };
                let total = match device.source.fetch(oid).await {
                    Ok(raw) => parse_numeric(&raw, 0.0),
                    Err(e) => {
                        tracing::warn!(device = %device.name, metric = denominator, oid = %oid, error = %e, "Query failed");
                        0.0
                    }
                };
                if total <= 0.0 {
                    return None;
                }
                (metric, numerator / total * 100.0)
            }
        };

        let classification = self.rules.classify(Subject::Metric {
            kind: device.kind,
            name: metric,
            value,
        });
        let mut record = device.record(now, metric, Some(value));
        classification.clone().apply(&mut record);
        Some((record, classification))
    }

    async fn poll_counters(
        &self,
        device: &PolledDevice,
        counters: &dyn CounterSource,
        now: DateTime<Local>,
        out: &mut Vec<NormalizedRecord>,
    ) {
        let sample = counters.read().await;
        let mut rates = self.rates.lock().await;

        for (counter, reading, metric) in [
            (Counter::Rx, sample.rx, RX_RATE),
            (Counter::Tx, sample.tx, TX_RATE),
        ] {
            match reading {
                Ok(current) => {
                    let rate = rates.observe(&device.name, counter, current, self.interval);
                    let mut record = device.record(now, metric, Some(rate));
                    self.rules.label(
                        &mut record,
                        Subject::Metric {
                            kind: device.kind,
                            name: metric,
                            value: rate,
                        },
                    );
                    out.push(record);
                }
                Err(e) => {
                    tracing::warn!(device = %device.name, %counter, source = %counters.describe(), error = %e, "Counter read failed");
                    out.push(device.record(now, metric, None).with_message(format!(
                        "{counter} counter unavailable via {}: {e}",
                        counters.describe()
                    )));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Collector for DevicePoller {
    fn name(&self) -> &str {
        "device-poller"
    }

    fn category(&self) -> &str {
        "poll"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Interval(self.interval)
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CollectorError> {
        let writer = self
            .writer
            .clone()
            .ok_or_else(|| CollectorError::Config("device poller has no sink writer".to_string()))?;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            // A cycle that has started runs to completion even if shutdown arrives meanwhile.
            let started = std::time::Instant::now();
            let records = self.poll_cycle(Local::now()).await;
            tracing::debug!(
                devices = self.devices.len(),
                records = records.len(),
                elapsed_ms = started.elapsed().as_millis(),
                "Poll cycle complete"
            );
            writer.append_all(records)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::poller::CounterSample;
    use crate::record::Label;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Source answering from a map; unknown OIDs time out.
    struct ScriptedSource(HashMap<String, String>);

    impl ScriptedSource {
        fn new(values: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self(
                values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ))
        }
    }

    #[async_trait::async_trait]
    impl MetricSource for ScriptedSource {
        async fn fetch(&self, oid: &Oid) -> Result<String, FetchError> {
            self.0
                .get(&oid.to_string())
                .cloned()
                .ok_or(FetchError::Timeout(Duration::from_secs(2)))
        }
    }

    /// Counter source replaying a fixed sequence of rx/tx values.
    struct SequenceCounters(StdMutex<Vec<(u64, u64)>>);

    #[async_trait::async_trait]
    impl CounterSource for SequenceCounters {
        async fn read(&self) -> CounterSample {
            let mut seq = self.0.lock().unwrap();
            let (rx, tx) = seq.remove(0);
            CounterSample { rx: Ok(rx), tx: Ok(tx) }
        }

        fn describe(&self) -> String {
            "sequence".to_string()
        }
    }

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn poller(devices: Vec<PolledDevice>) -> DevicePoller {
        DevicePoller::new(devices, Arc::new(RuleEngine::default()), Duration::from_secs(5))
    }

    fn find<'a>(records: &'a [NormalizedRecord], source: &str, metric: &str) -> &'a NormalizedRecord {
        records
            .iter()
            .find(|r| r.source == source && r.metric == metric)
            .unwrap_or_else(|| panic!("no {metric} record for {source}"))
    }

    #[tokio::test]
    async fn test_linux_derived_cpu_usage() {
        let source = ScriptedSource::new(&[("1.3.6.1.4.1.2021.11.11.0", "Gauge32: 10")]);
        let device = PolledDevice::new("VM1", DeviceKind::Linux, source)
            .with_metric("cpuIdle", oid("1.3.6.1.4.1.2021.11.11.0"));

        let records = poller(vec![device]).poll_cycle(Local::now()).await;
        assert_eq!(records.len(), 2);

        let usage = &records[0];
        assert_eq!(usage.metric, "cpuUsage");
        assert_eq!(usage.value, Some(90.0));
        assert_eq!(usage.label, Some(Label::CpuOverload));
        assert_eq!(usage.message, "CPU usage > 80%");

        let raw = &records[1];
        assert_eq!(raw.metric, "cpuIdle");
        assert_eq!(raw.value, Some(10.0));
        assert_eq!(raw.label, Some(Label::CpuOverload));
        assert_eq!(raw.message, "CPU usage > 80%");
        assert_eq!(raw.record_type, RecordType::SnmpPoll);
    }

    #[tokio::test]
    async fn test_idle_cpu_leaves_raw_row_normal() {
        let source = ScriptedSource::new(&[("1.3.6.1.4.1.2021.11.11.0", "95")]);
        let device = PolledDevice::new("VM1", DeviceKind::Linux, source)
            .with_metric("cpuIdle", oid("1.3.6.1.4.1.2021.11.11.0"));

        let records = poller(vec![device]).poll_cycle(Local::now()).await;
        let raw = find(&records, "VM1", "cpuIdle");
        assert_eq!(raw.label, None);
        assert!(raw.message.is_empty());
        assert_eq!(find(&records, "VM1", "cpuUsage").label, None);
    }

    #[tokio::test]
    async fn test_mem_usage_needs_total() {
        let source = ScriptedSource::new(&[
            ("1.3.6.1.4.1.2021.4.6.0", "950"),
            ("1.3.6.1.4.1.2021.4.5.0", "1000"),
        ]);
        let device = PolledDevice::new("VM1", DeviceKind::Linux, source.clone())
            .with_metric("memUsed", oid("1.3.6.1.4.1.2021.4.6.0"))
            .with_metric("memTotal", oid("1.3.6.1.4.1.2021.4.5.0"));
        let without_total = PolledDevice::new("VM2", DeviceKind::Linux, source)
            .with_metric("memUsed", oid("1.3.6.1.4.1.2021.4.6.0"));

        let records = poller(vec![device, without_total]).poll_cycle(Local::now()).await;

        let usage = find(&records, "VM1", "memUsage");
        assert_eq!(usage.value, Some(95.0));
        assert_eq!(usage.label, Some(Label::MemOverload));
        assert_eq!(usage.message, "Memory usage > 90% (95.0%)");

        let used = find(&records, "VM1", "memUsed");
        assert_eq!(used.label, Some(Label::MemOverload));
        assert_eq!(used.message, "Memory usage > 90% (95.0%)");

        assert!(!records.iter().any(|r| r.source == "VM2" && r.metric == "memUsage"));
        let used = find(&records, "VM2", "memUsed");
        assert_eq!(used.value, Some(950.0));
        assert_eq!(used.label, None);
    }

    #[tokio::test]
    async fn test_failed_query_does_not_stop_cycle() {
        let source = ScriptedSource::new(&[
            ("1.3.6.1.4.1.2021.10.1.3.2", "85.5"),
            ("1.3.6.1.2.1.1.3.0", "123456"),
        ]);
        let first = PolledDevice::new("VM1", DeviceKind::Linux, source.clone())
            .with_metric("load1", oid("1.3.6.1.4.1.2021.10.1.3.1"))
            .with_metric("load5", oid("1.3.6.1.4.1.2021.10.1.3.2"));
        let second = PolledDevice::new("R1", DeviceKind::NetworkDevice, source)
            .with_metric("sysUpTime", oid("1.3.6.1.2.1.1.3.0"));

        let records = poller(vec![first, second]).poll_cycle(Local::now()).await;
        assert_eq!(records.len(), 3);

        let failed = find(&records, "VM1", "load1");
        assert_eq!(failed.value, None);
        assert!(failed.message.contains("1.3.6.1.4.1.2021.10.1.3.1"));

        let load5 = find(&records, "VM1", "load5");
        assert_eq!(load5.value, Some(85.5));
        assert_eq!(load5.label, Some(Label::CpuOverload));
        assert_eq!(load5.message, "load5 usage > 80% (value=85.5)");

        assert_eq!(find(&records, "R1", "sysUpTime").value, Some(123456.0));
        assert!(records.iter().all(|r| r.value.is_some() || !r.message.is_empty()));
    }

    #[tokio::test]
    async fn test_unparseable_value_defaults_to_zero() {
        let source = ScriptedSource::new(&[("1.3.6.1.4.1.2021.10.1.3.1", "No Such Object")]);
        let device = PolledDevice::new("VM1", DeviceKind::Linux, source)
            .with_metric("load1", oid("1.3.6.1.4.1.2021.10.1.3.1"));

        let records = poller(vec![device]).poll_cycle(Local::now()).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, Some(0.0));
        assert_eq!(records[0].label, None);
        assert_eq!(
            records[0].message,
            "Could not convert 'No Such Object' to a number, defaulting to 0"
        );
    }

    #[tokio::test]
    async fn test_network_device_cpu5sec() {
        let source = ScriptedSource::new(&[("1.3.6.1.4.1.9.9.109.1.1.1.1.3.1", "91")]);
        let router = PolledDevice::new("R1", DeviceKind::NetworkDevice, source.clone())
            .with_metric("cpu5sec", oid("1.3.6.1.4.1.9.9.109.1.1.1.1.3.1"));
        let host = PolledDevice::new("VM1", DeviceKind::Linux, source)
            .with_metric("cpu5sec", oid("1.3.6.1.4.1.9.9.109.1.1.1.1.3.1"));

        let records = poller(vec![router, host]).poll_cycle(Local::now()).await;
        assert_eq!(find(&records, "R1", "cpu5sec").label, Some(Label::CpuOverload));
        assert_eq!(find(&records, "VM1", "cpu5sec").label, None);
    }

    #[tokio::test]
    async fn test_interface_rates() {
        let counters = SequenceCounters(StdMutex::new(vec![
            (1000, 50),
            (6000, 10_000_050),
        ]));
        let device = PolledDevice::new("deviceA", DeviceKind::Linux, ScriptedSource::new(&[]))
            .with_counters(counters);
        let poller = poller(vec![device]);

        let first = poller.poll_cycle(Local::now()).await;
        assert_eq!(find(&first, "deviceA", "rx_rate").value, Some(0.0));
        assert_eq!(find(&first, "deviceA", "tx_rate").value, Some(0.0));

        let second = poller.poll_cycle(Local::now()).await;
        let rx = find(&second, "deviceA", "rx_rate");
        assert_eq!(rx.value, Some(1000.0));
        assert_eq!(rx.label, None);

        let tx = find(&second, "deviceA", "tx_rate");
        assert_eq!(tx.value, Some(2_000_000.0));
        assert_eq!(tx.label, Some(Label::HighTx));
    }

    #[tokio::test]
    async fn test_counter_failure_yields_empty_rates() {
        let source = ScriptedSource::new(&[]);
        let counters = SnmpCounters::new(source.clone(), 3).unwrap();
        let device = PolledDevice::new("VM1", DeviceKind::Linux, source).with_counters(counters);

        let records = poller(vec![device]).poll_cycle(Local::now()).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.value.is_none()));
        assert!(records[0].message.starts_with("rx counter unavailable"));
    }

    #[test]
    fn test_poller_config_defaults() {
        let config: PollerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, PollerConfig::default());
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.retries, 1);
        assert_eq!(config.port, 161);
    }
}
