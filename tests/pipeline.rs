//! End-to-end pipeline tests for Sonar
//!
//! Each test drives the public API over loopback UDP and checks the rows that
//! land in the CSV record streams.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use sonar::collector::CollectorRegistry;
use sonar::collector::flow::{FlowCollector, FlowConfig};
use sonar::collector::poller::{DevicePoller, PolledDevice, PollerConfig};
use sonar::collector::trap::{TrapCollector, TrapConfig};
use sonar::config::DeviceConfig;
use sonar::snmp::{Message, Oid, Pdu, PduBody, PduType, Value, VarBind, Version};
use sonar::{DeviceKind, Label, RecordType, RuleEngine, SinkBuilder, SinkHandles, SinkWriter};
use tokio::net::UdpSocket;

// =============================================================================
// Test Helpers
// =============================================================================

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Wait until the writer has accepted `count` records.
async fn wait_for(writer: &SinkWriter, count: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while writer.appended() < count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} records"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Read a CSV stream, header included.
fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .expect("open record stream");
    reader
        .records()
        .map(|r| r.expect("csv row").iter().map(str::to_string).collect())
        .collect()
}

fn v5_packet(src: [u8; 4], dst: [u8; 4], dst_port: u16, packets: u32, octets: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(72);
    data.extend_from_slice(&5u16.to_be_bytes());
    data.extend_from_slice(&1u16.to_be_bytes());
    data.extend_from_slice(&[0u8; 20]);

    let mut record = [0u8; 48];
    record[0..4].copy_from_slice(&src);
    record[4..8].copy_from_slice(&dst);
    record[16..20].copy_from_slice(&packets.to_be_bytes());
    record[20..24].copy_from_slice(&octets.to_be_bytes());
    record[32..34].copy_from_slice(&40000u16.to_be_bytes());
    record[34..36].copy_from_slice(&dst_port.to_be_bytes());
    record[38] = 6;
    data.extend_from_slice(&record);
    data
}

fn oid(s: &str) -> Oid {
    s.parse().expect("valid oid")
}

/// Scripted SNMP agent answering GETs from a fixed table.
async fn spawn_agent(table: HashMap<String, Value>) -> Option<SocketAddr> {
    let socket = UdpSocket::bind((LOCALHOST, 0)).await.ok()?;
    let addr = socket.local_addr().ok()?;

    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(request) = Message::decode(&buf[..n]) else {
                continue;
            };
            let PduBody::Pdu(pdu) = request.body else {
                continue;
            };
            let varbinds = pdu
                .varbinds
                .iter()
                .map(|vb| {
                    let value = table
                        .get(&vb.oid.to_string())
                        .cloned()
                        .unwrap_or(Value::NoSuchInstance);
                    VarBind::new(vb.oid.clone(), value)
                })
                .collect();
            let response = Message {
                version: request.version,
                community: request.community,
                body: PduBody::Pdu(Pdu {
                    pdu_type: PduType::Response,
                    request_id: pdu.request_id,
                    error_status: 0,
                    error_index: 0,
                    varbinds,
                }),
            };
            let _ = socket.send_to(&response.encode().unwrap(), peer).await;
        }
    });

    Some(addr)
}

fn sink(dir: &Path) -> SinkHandles {
    SinkBuilder::new(dir)
        .channel_capacity(64)
        .build()
        .expect("build sink")
}

// =============================================================================
// Flow Export
// =============================================================================

#[tokio::test]
async fn test_flow_packet_becomes_csv_row() {
    let dir = tempfile::tempdir().unwrap();
    let handles = sink(dir.path());
    let rules = Arc::new(RuleEngine::default());

    let config = FlowConfig::default().with_bind(LOCALHOST).with_port(0);
    let Ok(flow) = FlowCollector::bind(config, rules, handles.writer.clone()).await else {
        eprintln!("skipping: cannot bind loopback UDP");
        return;
    };
    let addr = flow.local_addr().unwrap();

    let registry = CollectorRegistry::new();
    registry.spawn(flow).await;

    let exporter = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    exporter
        .send_to(&v5_packet([192, 168, 1, 10], [192, 168, 1, 20], 445, 10, 1500), addr)
        .await
        .unwrap();

    wait_for(&handles.writer, 1).await;
    registry.shutdown().await;
    let path = handles.paths.flow.clone();
    handles.shutdown().unwrap();

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        ["timestamp", "source", "record_type", "metric", "value", "label", "message"]
    );

    let row = &rows[1];
    assert_eq!(row[1], "127.0.0.1");
    assert_eq!(row[2], RecordType::Flow.to_string());
    assert_eq!(row[3], "flow");
    assert_eq!(row[4], "10.0");
    assert_eq!(row[5], Label::SuspiciousPort.to_string());
    assert_eq!(
        row[6],
        "Flow 1/1, Ver:5, Src:192.168.1.10:40000 -> 192.168.1.20:445, Pkts:10, Bytes:1500, Proto:6 | Suspicious DST port 445"
    );
}

#[tokio::test]
async fn test_garbage_datagram_keeps_listener_alive() {
    let dir = tempfile::tempdir().unwrap();
    let handles = sink(dir.path());
    let rules = Arc::new(RuleEngine::default());

    let config = FlowConfig::default().with_bind(LOCALHOST).with_port(0);
    let Ok(flow) = FlowCollector::bind(config, rules, handles.writer.clone()).await else {
        eprintln!("skipping: cannot bind loopback UDP");
        return;
    };
    let addr = flow.local_addr().unwrap();

    let registry = CollectorRegistry::new();
    registry.spawn(flow).await;

    let exporter = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    exporter.send_to(&[0x00, 0x07, 0xff], addr).await.unwrap();
    exporter
        .send_to(&v5_packet([10, 0, 0, 1], [10, 0, 0, 2], 80, 3, 300), addr)
        .await
        .unwrap();

    wait_for(&handles.writer, 1).await;
    registry.shutdown().await;
    let path = handles.paths.flow.clone();
    handles.shutdown().unwrap();

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][5], "");
}

// =============================================================================
// Traps
// =============================================================================

#[tokio::test]
async fn test_inform_becomes_csv_row_and_is_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let handles = sink(dir.path());

    let config = TrapConfig::default().with_bind(LOCALHOST).with_port(0);
    let Ok(trap) = TrapCollector::bind(config, handles.writer.clone()).await else {
        eprintln!("skipping: cannot bind loopback UDP");
        return;
    };
    let addr = trap.local_addr().unwrap();

    let registry = CollectorRegistry::new();
    registry.spawn(trap).await;

    let inform = Message {
        version: Version::V2c,
        community: b"public".to_vec(),
        body: PduBody::Pdu(Pdu {
            pdu_type: PduType::InformRequest,
            request_id: 9001,
            error_status: 0,
            error_index: 0,
            varbinds: vec![
                VarBind::new(oid("1.3.6.1.2.1.1.3.0"), Value::TimeTicks(12345)),
                VarBind::new(
                    oid("1.3.6.1.6.3.1.1.4.1.0"),
                    Value::ObjectId(oid("1.3.6.1.6.3.1.1.5.3")),
                ),
                VarBind::new(
                    oid("1.3.6.1.6.3.18.1.3.0"),
                    Value::IpAddress(Ipv4Addr::new(10, 9, 8, 7)),
                ),
            ],
        }),
    };

    let agent = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    agent.send_to(&inform.encode().unwrap(), addr).await.unwrap();

    let mut buf = vec![0u8; 1500];
    let (n, _) = tokio::time::timeout(Duration::from_secs(5), agent.recv_from(&mut buf))
        .await
        .expect("inform acknowledged")
        .unwrap();
    let ack = Message::decode(&buf[..n]).unwrap();
    let PduBody::Pdu(ack) = ack.body else {
        panic!("unexpected ack body");
    };
    assert_eq!(ack.pdu_type, PduType::Response);
    assert_eq!(ack.request_id, 9001);

    wait_for(&handles.writer, 1).await;
    registry.shutdown().await;
    let path = handles.paths.trap.clone();
    handles.shutdown().unwrap();

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 2);
    let row = &rows[1];
    assert_eq!(row[1], "10.9.8.7");
    assert_eq!(row[2], RecordType::SnmpTrap.to_string());
    assert_eq!(row[3], "trap");
    assert_eq!(row[4], "");
    assert_eq!(row[5], "");
    assert_eq!(
        row[6],
        "1.3.6.1.2.1.1.3.0 = 12345 | 1.3.6.1.6.3.1.1.4.1.0 = 1.3.6.1.6.3.1.1.5.3 | 1.3.6.1.6.3.18.1.3.0 = 10.9.8.7"
    );
}

// =============================================================================
// Polling
// =============================================================================

#[tokio::test]
async fn test_poll_cycle_against_scripted_agent() {
    let table = HashMap::from([
        ("1.3.6.1.4.1.2021.11.11.0".to_string(), Value::Integer(15)),
        (
            "1.3.6.1.4.1.2021.10.1.3.1".to_string(),
            Value::OctetString(b"0.42".to_vec()),
        ),
    ]);
    let Some(agent) = spawn_agent(table).await else {
        eprintln!("skipping: cannot bind loopback UDP");
        return;
    };

    let device = DeviceConfig {
        name: "VM1".to_string(),
        address: agent.ip(),
        port: Some(agent.port()),
        community: "public".to_string(),
        kind: DeviceKind::Linux,
        metrics: BTreeMap::from([
            ("cpuIdle".to_string(), ".1.3.6.1.4.1.2021.11.11.0".to_string()),
            ("load1".to_string(), ".1.3.6.1.4.1.2021.10.1.3.1".to_string()),
            ("swapTotal".to_string(), ".1.3.6.1.4.1.2021.4.3.0".to_string()),
        ]),
        counters: None,
    };
    let poller_config = PollerConfig::default().with_timeout(Duration::from_millis(200));
    let polled = PolledDevice::from_config(&device, &poller_config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let handles = sink(dir.path());
    let poller = DevicePoller::new(
        vec![polled],
        Arc::new(RuleEngine::default()),
        poller_config.interval,
    )
    .with_writer(handles.writer.clone());

    let records = poller.poll_cycle(Local::now()).await;
    let summary: Vec<_> = records
        .iter()
        .map(|r| (r.metric.as_str(), r.value, r.label))
        .collect();
    assert_eq!(
        summary,
        [
            ("cpuUsage", Some(85.0), Some(Label::CpuOverload)),
            ("cpuIdle", Some(15.0), Some(Label::CpuOverload)),
            ("load1", Some(0.42), None),
            ("swapTotal", None, None),
        ]
    );
    assert!(records.iter().all(|r| r.source == "VM1"));
    assert_eq!(records[1].message, "CPU usage > 80%");
    assert!(records[3].message.starts_with("SNMP polling returned no value for"));

    handles.writer.append_all(records).unwrap();
    let path = handles.paths.poll.clone();
    handles.shutdown().unwrap();

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[1][2], RecordType::SnmpPoll.to_string());
    assert_eq!(rows[1][4], "85.0");
    assert_eq!(rows[1][6], "CPU usage > 80%");
    assert_eq!(rows[4][4], "");
}
