//! Trap listener.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::collector::trap::{Notification, on_notification};
use crate::collector::{Collector, CollectorError, Schedule};
use crate::sink::SinkWriter;
use crate::snmp::Message;

/// Default trap port.
pub const DEFAULT_TRAP_PORT: u16 = 162;

/// Largest notification accepted.
const MAX_DATAGRAM: usize = 65_507;

fn default_enabled() -> bool {
    true
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_TRAP_PORT
}

fn default_communities() -> Vec<String> {
    vec!["public".to_string()]
}

/// Configuration for the trap listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrapConfig {
    /// Enable the listener (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Listen address (default: 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Listen port (default: 162).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Accepted communities (default: `["public"]`). Empty accepts any.
    #[serde(default = "default_communities")]
    pub communities: Vec<String>,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: DEFAULT_TRAP_PORT,
            communities: default_communities(),
        }
    }
}

impl TrapConfig {
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

    fn accepts(&self, community: &str) -> bool {
        self.communities.is_empty() || self.communities.iter().any(|c| c == community)
    }
}

/// SNMP notification listener.
pub struct TrapCollector {
    config: TrapConfig,
    socket: UdpSocket,
    writer: SinkWriter,
}

impl std::fmt::Debug for TrapCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapCollector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TrapCollector {
    /// Bind the listen socket.
    pub async fn bind(config: TrapConfig, writer: SinkWriter) -> Result<Self, CollectorError> {
        let socket = UdpSocket::bind(config.socket_addr()).await?;
        tracing::info!(addr = %socket.local_addr()?, "Trap listener bound");
        Ok(Self {
            config,
            socket,
            writer,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle one datagram. Returns the encoded acknowledgement for informs.
    pub fn handle_datagram(
        &self,
        data: &[u8],
        peer: SocketAddr,
    ) -> Result<Option<Vec<u8>>, CollectorError> {
        let message = match Message::decode(data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%peer, bytes = data.len(), error = %e, "Failed to decode notification");
                return Ok(None);
            }
        };

        let Some(notification) = Notification::from_message(&message) else {
            tracing::debug!(%peer, "Ignoring non-notification PDU");
            return Ok(None);
        };

        if !self.config.accepts(&notification.community) {
            tracing::warn!(%peer, community = %notification.community, "Dropping notification with unknown community");
            return Ok(None);
        }

        // transport address is logged only; the record source comes from the payload
        tracing::debug!(%peer, "Notification received");
        let record = on_notification(
            notification.source.as_deref(),
            &notification.bindings,
            Local::now(),
        );
        self.writer.append(record)?;

        let ack = match message.inform_ack() {
            Some(ack) => match ack.encode() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "Failed to encode inform response");
                    None
                }
            },
            None => None,
        };
        Ok(ack)
    }
}

#[async_trait::async_trait]
impl Collector for TrapCollector {
    fn name(&self) -> &str {
        "trap-listener"
    }

    fn category(&self) -> &str {
        "trap"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Continuous
    }

    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CollectorError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((n, peer)) => {
                        if let Some(ack) = self.handle_datagram(&buf[..n], peer)?
                            && let Err(e) = self.socket.send_to(&ack, peer).await
                        {
                            tracing::warn!(%peer, error = %e, "Failed to acknowledge inform");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Trap socket receive failed");
                    }
                },
            }
        }

        Ok(())
    }
}
