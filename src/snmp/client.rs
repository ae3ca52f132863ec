//! Async SNMP v2c GET client.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::snmp::{Message, Oid, PduBody, PduType, SnmpError, Value};

/// Largest response datagram accepted.
const MAX_RESPONSE_SIZE: usize = 65_507;

/// GET client bound to one agent.
///
/// Every request uses a fresh ephemeral socket, so responses that arrive
/// after a timeout cannot be confused with a later request.
#[derive(Debug)]
pub struct SnmpClient {
    agent: SocketAddr,
    community: String,
    timeout: Duration,
    retries: u32,
    next_request_id: AtomicI32,
}

impl SnmpClient {
    pub fn new(
        agent: SocketAddr,
        community: impl Into<String>,
        timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            agent,
            community: community.into(),
            timeout,
            retries,
            next_request_id: AtomicI32::new(1),
        }
    }

    pub fn agent(&self) -> SocketAddr {
        self.agent
    }

    fn request_id(&self) -> i32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) & i32::MAX
    }

    /// Fetch a single OID.
    ///
    /// Each attempt waits up to the configured timeout; `retries` further
    /// attempts follow the first. Exception values (`noSuchObject`, ...)
    /// and an agent error-status are errors.
    pub async fn get(&self, oid: &Oid) -> Result<Value, SnmpError> {
        let request_id = self.request_id();
        let request = Message::get_request(
            self.community.as_bytes(),
            request_id,
            std::slice::from_ref(oid),
        )
        .encode()?;

        let local: SocketAddr = if self.agent.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.agent).await?;

        let mut buf = vec![0u8; MAX_RESPONSE_SIZE];
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            socket.send(&request).await?;
            let deadline = Instant::now() + self.timeout;

            loop {
                let n = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                    Ok(received) => received?,
                    Err(_) => break,
                };
                let response = match Message::decode(&buf[..n]) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!(agent = %self.agent, error = %e, "Ignoring undecodable datagram");
                        continue;
                    }
                };
                if let PduBody::Pdu(pdu) = response.body
                    && pdu.pdu_type == PduType::Response
                    && pdu.request_id == request_id
                {
                    if pdu.error_status != 0 {
                        return Err(SnmpError::ErrorStatus {
                            status: pdu.error_status,
                            index: pdu.error_index,
                        });
                    }
                    return match pdu.varbinds.into_iter().next() {
                        Some(vb) if !vb.value.is_empty_response() => Ok(vb.value),
                        _ => Err(SnmpError::EmptyResponse {
                            oid: oid.to_string(),
                        }),
                    };
                }
            }

            tracing::debug!(agent = %self.agent, %oid, attempt, "SNMP request timed out");
        }

        Err(SnmpError::Timeout {
            agent: self.agent,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::{Pdu, VarBind};
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    /// Agent answering every GET with `value`, after ignoring the first `drop_first` requests.
    async fn spawn_agent(value: Value, drop_first: usize) -> (SocketAddr, Arc<AtomicUsize>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < drop_first {
                    continue;
                }
                let request = Message::decode(&buf[..n]).unwrap();
                let PduBody::Pdu(pdu) = request.body else {
                    continue;
                };
                let response = Message {
                    version: request.version,
                    community: request.community,
                    body: PduBody::Pdu(Pdu {
                        pdu_type: PduType::Response,
                        request_id: pdu.request_id,
                        error_status: 0,
                        error_index: 0,
                        varbinds: vec![VarBind::new(pdu.varbinds[0].oid.clone(), value.clone())],
                    }),
                };
                let _ = socket.send_to(&response.encode().unwrap(), peer).await;
            }
        });

        (addr, seen)
    }

    fn oid() -> Oid {
        "1.3.6.1.4.1.2021.10.1.3.1".parse().unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_value() {
        let (addr, _) = spawn_agent(Value::OctetString(b"0.42".to_vec()), 0).await;
        let client = SnmpClient::new(addr, "public", Duration::from_millis(500), 1);

        let value = client.get(&oid()).await.unwrap();
        assert_eq!(value.render(), "0.42");
    }

    #[tokio::test]
    async fn test_get_retries_once() {
        let (addr, seen) = spawn_agent(Value::Gauge32(7), 1).await;
        let client = SnmpClient::new(addr, "public", Duration::from_millis(100), 1);

        let value = client.get(&oid()).await.unwrap();
        assert_eq!(value, Value::Gauge32(7));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_times_out() {
        let (addr, seen) = spawn_agent(Value::Gauge32(7), usize::MAX).await;
        let client = SnmpClient::new(addr, "public", Duration::from_millis(50), 1);

        let err = client.get(&oid()).await.unwrap_err();
        assert!(matches!(err, SnmpError::Timeout { attempts: 2, .. }));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_such_instance_is_empty_response() {
        let (addr, _) = spawn_agent(Value::NoSuchInstance, 0).await;
        let client = SnmpClient::new(addr, "public", Duration::from_millis(500), 0);

        let err = client.get(&oid()).await.unwrap_err();
        assert!(matches!(err, SnmpError::EmptyResponse { .. }));
    }
}
