//! Flow export listener.
//!
//! Receives NetFlow/IPFIX datagrams on one UDP socket and forwards the
//! decoded, labeled records to the sink.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::collector::flow::{FlowDecoder, TemplateCache};
use crate::collector::{Collector, CollectorError, Schedule};
use crate::rules::RuleEngine;
use crate::sink::SinkWriter;

/// Default flow export port.
pub const DEFAULT_FLOW_PORT: u16 = 9999;

/// Default receive buffer (bytes per datagram).
pub const DEFAULT_RECV_BUFFER: usize = 8192;

fn default_enabled() -> bool {
    true
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_FLOW_PORT
}

fn default_recv_buffer() -> usize {
    DEFAULT_RECV_BUFFER
}

/// Configuration for the flow listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Enable the listener (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Listen address (default: 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Listen port (default: 9999).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest datagram accepted (default: 8192).
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,
    /// Evict templates of exporters silent for this long (default: never).
    #[serde(default, with = "humantime_serde")]
    pub template_idle_timeout: Option<Duration>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: DEFAULT_FLOW_PORT,
            recv_buffer: DEFAULT_RECV_BUFFER,
            template_idle_timeout: None,
        }
    }
}

impl FlowConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_template_idle_timeout(mut self, timeout: Duration) -> Self {
        self.template_idle_timeout = Some(timeout);
        self
    }
}

/// Flow export listener.
pub struct FlowCollector {
    config: FlowConfig,
    socket: UdpSocket,
    decoder: FlowDecoder,
    writer: SinkWriter,
}

impl std::fmt::Debug for FlowCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowCollector")
            .field("config", &self.config)
            .field("templates", &self.decoder.templates().len())
            .finish_non_exhaustive()
    }
}

impl FlowCollector {
    /// Bind the listen socket.
    ///
    /// Binding happens before the unit is spawned so that a taken port is
    /// a startup error.
    pub async fn bind(
        config: FlowConfig,
        rules: Arc<RuleEngine>,
        writer: SinkWriter,
    ) -> Result<Self, CollectorError> {
        let socket = UdpSocket::bind(config.socket_addr()).await?;
        tracing::info!(addr = %socket.local_addr()?, "Flow listener bound");

        let decoder = FlowDecoder::new(TemplateCache::new(config.template_idle_timeout), rules);
        Ok(Self {
            config,
            socket,
            decoder,
            writer,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Decode one datagram and enqueue its records. Returns the record count.
    pub fn handle_datagram(&mut self, data: &[u8], exporter: IpAddr) -> Result<usize, CollectorError> {
        let records = self.decoder.decode(data, exporter, Local::now());
        let count = records.len();
        self.writer.append_all(records)?;
        Ok(count)
    }
}

#[async_trait::async_trait]
impl Collector for FlowCollector {
    fn name(&self) -> &str {
        "flow-listener"
    }

    fn category(&self) -> &str {
        "flow"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Continuous
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CollectorError> {
        let mut buf = vec![0u8; self.config.recv_buffer];

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, peer)) => {
                        let count = self.handle_datagram(&buf[..n], peer.ip())?;
                        tracing::trace!(exporter = %peer, bytes = n, records = count, "Flow datagram handled");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Flow socket receive failed");
                    }
                },
            }
        }

        Ok(())
    }
}
