//! Metric and interface-counter sources.
//!
//! - [`MetricSource`]: fetch one raw value by OID (implemented by [`SnmpClient`])
//! - [`CounterSource`]: read the rx/tx byte counters of one interface, either
//!   through SNMP ([`SnmpCounters`]) or a remote shell command ([`ShellCounters`])

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::snmp::{Oid, SnmpClient, SnmpError};

/// `ifHCInOctets`, indexed by ifIndex.
pub const IF_HC_IN_OCTETS: &str = "1.3.6.1.2.1.31.1.1.1.6";

/// `ifHCOutOctets`, indexed by ifIndex.
pub const IF_HC_OUT_OCTETS: &str = "1.3.6.1.2.1.31.1.1.1.10";

/// Remote counter-file read used when no command is configured.
pub const DEFAULT_SHELL_COMMAND: &str =
    "ssh -o BatchMode=yes -o ConnectTimeout=5 {target} cat /proc/net/dev";

/// Failure to obtain a value from a device.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("SNMP query failed: {0}")]
    Snmp(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("command failed: {0}")]
    Command(String),

    #[error("interface {0} not found")]
    InterfaceNotFound(String),

    #[error("unparseable value '{0}'")]
    Parse(String),
}

impl From<SnmpError> for FetchError {
    fn from(e: SnmpError) -> Self {
        Self::Snmp(e.to_string())
    }
}

// =============================================================================
// Numeric parsing
// =============================================================================

/// Parse raw text into a number, tolerating a type annotation such as
/// `Gauge32: 42` or `STRING: "0.15"`.
pub fn try_parse_numeric(raw: &str) -> Option<f64> {
    static TYPE_PREFIX: OnceLock<regex::Regex> = OnceLock::new();

    let regex = TYPE_PREFIX.get_or_init(|| {
        regex::Regex::new(r"^\s*[A-Za-z][A-Za-z0-9-]*:\s*")
            .expect("failed to compile type prefix regex")
    });

    let stripped = regex.replace(raw, "");
    let value = stripped.trim().trim_matches('"').trim();
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// [`try_parse_numeric`], falling back to `default`.
pub fn parse_numeric(raw: &str, default: f64) -> f64 {
    match try_parse_numeric(raw) {
        Some(v) => v,
        None => {
            tracing::debug!(raw, default, "Could not convert value, using default");
            default
        }
    }
}

fn parse_counter(raw: &str) -> Result<u64, FetchError> {
    let value = try_parse_numeric(raw).ok_or_else(|| FetchError::Parse(raw.to_string()))?;
    if value < 0.0 {
        return Err(FetchError::Parse(raw.to_string()));
    }
    // Counter64 values above 2^53 lose precision through f64; parse exactly when possible.
    Ok(raw
        .rsplit(':')
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(value as u64))
}

// =============================================================================
// Metric sources
// =============================================================================

/// Fetches one raw value by OID.
#[async_trait::async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch(&self, oid: &Oid) -> Result<String, FetchError>;
}

#[async_trait::async_trait]
impl MetricSource for SnmpClient {
    async fn fetch(&self, oid: &Oid) -> Result<String, FetchError> {
        Ok(self.get(oid).await?.render())
    }
}

// =============================================================================
// Counter sources
// =============================================================================

/// One reading of both interface counters. Each side fails independently.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSample {
    pub rx: Result<u64, FetchError>,
    pub tx: Result<u64, FetchError>,
}

impl CounterSample {
    fn failed(err: FetchError) -> Self {
        Self {
            rx: Err(err.clone()),
            tx: Err(err),
        }
    }
}

/// Reads the current rx/tx byte counters of one interface.
#[async_trait::async_trait]
pub trait CounterSource: Send + Sync {
    async fn read(&self) -> CounterSample;

    /// Short description for diagnostics.
    fn describe(&self) -> String;
}

/// Counters via `ifHCInOctets` / `ifHCOutOctets`.
pub struct SnmpCounters {
    source: Arc<dyn MetricSource>,
    if_index: u32,
    rx_oid: Oid,
    tx_oid: Oid,
}

impl SnmpCounters {
    pub fn new(source: Arc<dyn MetricSource>, if_index: u32) -> Result<Self, FetchError> {
        let table = |base: &str| -> Result<Oid, FetchError> {
            Ok(base.parse::<Oid>()?.child(if_index))
        };
        Ok(Self {
            source,
            if_index,
            rx_oid: table(IF_HC_IN_OCTETS)?,
            tx_oid: table(IF_HC_OUT_OCTETS)?,
        })
    }
}

impl std::fmt::Debug for SnmpCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnmpCounters")
            .field("if_index", &self.if_index)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl CounterSource for SnmpCounters {
    async fn read(&self) -> CounterSample {
        let rx = match self.source.fetch(&self.rx_oid).await {
            Ok(raw) => parse_counter(&raw),
            Err(e) => Err(e),
        };
        let tx = match self.source.fetch(&self.tx_oid).await {
            Ok(raw) => parse_counter(&raw),
            Err(e) => Err(e),
        };
        CounterSample { rx, tx }
    }

    fn describe(&self) -> String {
        format!("ifHC octets.{}", self.if_index)
    }
}

/// Counters from `/proc/net/dev` produced by a command (ssh by default).
#[derive(Debug, Clone)]
pub struct ShellCounters {
    argv: Vec<String>,
    interface: String,
    timeout: Duration,
}

impl ShellCounters {
    /// Build from a command line. `{target}`, `{address}`, `{user}` and
    /// `{interface}` are substituted before the line is split into words.
    pub fn from_command(
        command: &str,
        address: IpAddr,
        user: Option<&str>,
        interface: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let interface = interface.into();
        let target = match user {
            Some(user) => format!("{user}@{address}"),
            None => address.to_string(),
        };
        let line = command
            .replace("{target}", &target)
            .replace("{address}", &address.to_string())
            .replace("{user}", user.unwrap_or_default())
            .replace("{interface}", &interface);

        let argv = shell_words::split(&line)
            .map_err(|e| FetchError::Command(format!("invalid command '{line}': {e}")))?;
        if argv.is_empty() {
            return Err(FetchError::Command("empty command".to_string()));
        }

        Ok(Self {
            argv,
            interface,
            timeout,
        })
    }

    /// Default `ssh ... cat /proc/net/dev` read.
    pub fn ssh(
        address: IpAddr,
        user: Option<&str>,
        interface: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        Self::from_command(DEFAULT_SHELL_COMMAND, address, user, interface, timeout)
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    async fn run(&self) -> Result<(u64, u64), FetchError> {
        let mut command = Command::new(&self.argv[0]);
        command
            .args(&self.argv[1..])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(|e| FetchError::Command(format!("{}: {e}", self.argv[0])))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Command(format!(
                "{} exited with {}: {}",
                self.argv[0],
                output.status,
                stderr.trim()
            )));
        }

        parse_proc_net_dev(&String::from_utf8_lossy(&output.stdout), &self.interface)
    }
}

#[async_trait::async_trait]
impl CounterSource for ShellCounters {
    async fn read(&self) -> CounterSample {
        match self.run().await {
            Ok((rx, tx)) => CounterSample {
                rx: Ok(rx),
                tx: Ok(tx),
            },
            Err(e) => CounterSample::failed(e),
        }
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.argv[0], self.interface)
    }
}

/// Extract (rx bytes, tx bytes) of `interface` from `/proc/net/dev` text.
pub fn parse_proc_net_dev(text: &str, interface: &str) -> Result<(u64, u64), FetchError> {
    for line in text.lines() {
        let Some((name, stats)) = line.split_once(':') else {
            continue;
        };
        if name.trim() != interface {
            continue;
        }

        let fields: Vec<&str> = stats.split_whitespace().collect();
        let field = |i: usize| -> Result<u64, FetchError> {
            fields
                .get(i)
                .and_then(|f| f.parse::<u64>().ok())
                .ok_or_else(|| FetchError::Parse(line.trim().to_string()))
        };
        return Ok((field(0)?, field(8)?));
    }

    Err(FetchError::InterfaceNotFound(interface.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const PROC_NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  104120    1234    0    0    0     0          0         0   104120    1234    0    0    0     0       0          0
enp0s8: 987654321  45678    0    0    0     0          0        12 123456789  34567    0    0    0     0       0          0
";

    struct MapSource(HashMap<String, Result<String, FetchError>>);

    #[async_trait::async_trait]
    impl MetricSource for MapSource {
        async fn fetch(&self, oid: &Oid) -> Result<String, FetchError> {
            self.0
                .get(&oid.to_string())
                .cloned()
                .unwrap_or_else(|| Err(FetchError::Snmp("noSuchObject".to_string())))
        }
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(try_parse_numeric("42"), Some(42.0));
        assert_eq!(try_parse_numeric("Gauge32: 42"), Some(42.0));
        assert_eq!(try_parse_numeric("Gauge32:17"), Some(17.0));
        assert_eq!(try_parse_numeric("STRING: \"0.15\""), Some(0.15));
        assert_eq!(try_parse_numeric(" 1.5 "), Some(1.5));
        assert_eq!(try_parse_numeric(""), None);
        assert_eq!(try_parse_numeric("eth0"), None);
        assert_eq!(try_parse_numeric("NaN"), None);

        assert_eq!(parse_numeric("garbage", 0.0), 0.0);
        assert_eq!(parse_numeric("Gauge32: 7", 0.0), 7.0);
    }

    #[test]
    fn test_parse_counter_exact() {
        assert_eq!(parse_counter("18446744073709551000").unwrap(), 18_446_744_073_709_551_000);
        assert_eq!(parse_counter("Counter64: 6000").unwrap(), 6000);
        assert!(parse_counter("-5").is_err());
        assert!(parse_counter("n/a").is_err());
    }

    #[test]
    fn test_parse_proc_net_dev() {
        assert_eq!(
            parse_proc_net_dev(PROC_NET_DEV, "enp0s8").unwrap(),
            (987_654_321, 123_456_789)
        );
        assert_eq!(parse_proc_net_dev(PROC_NET_DEV, "lo").unwrap(), (104_120, 104_120));
        assert_eq!(
            parse_proc_net_dev(PROC_NET_DEV, "eth9"),
            Err(FetchError::InterfaceNotFound("eth9".to_string()))
        );
        assert!(matches!(
            parse_proc_net_dev("eth0: 1 2 3", "eth0"),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn test_default_ssh_command() {
        let counters = ShellCounters::ssh(
            "10.0.0.5".parse().unwrap(),
            Some("monitor"),
            "enp0s8",
            Duration::from_secs(2),
        )
        .unwrap();
        assert_eq!(
            counters.argv(),
            &[
                "ssh",
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=5",
                "monitor@10.0.0.5",
                "cat",
                "/proc/net/dev"
            ]
        );
    }

    #[test]
    fn test_invalid_command() {
        let result = ShellCounters::from_command(
            "ssh 'unterminated",
            "10.0.0.5".parse().unwrap(),
            None,
            "eth0",
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(FetchError::Command(_))));
    }

    #[tokio::test]
    async fn test_snmp_counters() {
        let source = MapSource(HashMap::from([
            ("1.3.6.1.2.1.31.1.1.1.6.3".to_string(), Ok("6000".to_string())),
            (
                "1.3.6.1.2.1.31.1.1.1.10.3".to_string(),
                Err(FetchError::Timeout(Duration::from_secs(2))),
            ),
        ]));
        let counters = SnmpCounters::new(Arc::new(source), 3).unwrap();

        let sample = counters.read().await;
        assert_eq!(sample.rx, Ok(6000));
        assert_eq!(sample.tx, Err(FetchError::Timeout(Duration::from_secs(2))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_counters_command() {
        let counters = ShellCounters::from_command(
            "printf '{interface}: 1500 3 0 0 0 0 0 0 2500 4 0 0 0 0 0 0\\n'",
            "127.0.0.1".parse().unwrap(),
            None,
            "eth0",
            Duration::from_secs(5),
        )
        .unwrap();

        let sample = counters.read().await;
        assert_eq!(sample.rx, Ok(1500));
        assert_eq!(sample.tx, Ok(2500));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_counters_failure_and_timeout() {
        let failing = ShellCounters::from_command(
            "false",
            "127.0.0.1".parse().unwrap(),
            None,
            "eth0",
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(failing.read().await.rx, Err(FetchError::Command(_))));

        let slow = ShellCounters::from_command(
            "sleep 5",
            "127.0.0.1".parse().unwrap(),
            None,
            "eth0",
            Duration::from_millis(50),
        )
        .unwrap();
        let sample = slow.read().await;
        assert_eq!(sample.rx, Err(FetchError::Timeout(Duration::from_millis(50))));
        assert_eq!(sample.tx, sample.rx);
    }
}
