//! In-process stand-ins for the broker, schema registry and Kafka Connect.
//!
//! These let producers and connector setup run without external services;
//! every mock records the calls it received so tests can assert on them.
//! [`CannedHttpServer`] drives the real HTTP clients against a loopback
//! socket.

use crate::config::TopicSettings;
use crate::connector::{ConnectClient, ConnectorRequest};
use crate::kafka::delivery::{DeliveryReport, DeliverySender, DeliveryStatus};
use crate::kafka::sink::{OutboundRecord, RecordSink, SinkFactory};
use crate::kafka::topic_manager::{CreateTopicResult, TopicAdmin};
use crate::schema_registry::{SchemaId, SchemaRegistry};
use crate::{Error, Result};
use apache_avro::Schema;
use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Topic admin
// ============================================================================

#[derive(Default)]
pub struct MockTopicAdmin {
    existing: Mutex<HashSet<String>>,
    fail_once: Mutex<HashSet<String>>,
    always_fail: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, TopicSettings)>>,
}

impl MockTopicAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topic the broker reports as already existing.
    pub fn with_existing(self, name: &str) -> Self {
        lock(&self.existing).insert(name.to_string());
        self
    }

    /// First create request for `name` fails with a broker error.
    pub fn failing_once(self, name: &str) -> Self {
        lock(&self.fail_once).insert(name.to_string());
        self
    }

    /// Every create request fails with a broker error.
    pub fn failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Simulated broker round-trip time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn create_calls(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|(topic, _)| topic == name).count()
    }

    pub fn total_create_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn created_settings(&self, name: &str) -> Option<TopicSettings> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|(topic, _)| topic == name)
            .map(|(_, settings)| settings.clone())
    }
}

#[async_trait]
impl TopicAdmin for MockTopicAdmin {
    async fn create_topic(&self, name: &str, settings: &TopicSettings) -> Result<CreateTopicResult> {
        lock(&self.calls).push((name.to_string(), settings.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.always_fail || lock(&self.fail_once).remove(name) {
            return Err(Error::Kafka(KafkaError::AdminOp(
                RDKafkaErrorCode::BrokerTransportFailure,
            )));
        }

        if lock(&self.existing).insert(name.to_string()) {
            Ok(CreateTopicResult::Created)
        } else {
            Ok(CreateTopicResult::AlreadyExists)
        }
    }
}

// ============================================================================
// Schema registry
// ============================================================================

pub struct MockSchemaRegistry {
    unreachable: bool,
    next_id: AtomicU32,
    ids: Mutex<HashMap<(String, String), SchemaId>>,
    registrations: Mutex<Vec<String>>,
}

impl MockSchemaRegistry {
    pub fn new() -> Self {
        Self {
            unreachable: false,
            next_id: AtomicU32::new(1),
            ids: Mutex::new(HashMap::new()),
            registrations: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new()
        }
    }

    /// Subjects in the order registration requests arrived.
    pub fn subjects(&self) -> Vec<String> {
        lock(&self.registrations).clone()
    }
}

impl Default for MockSchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRegistry for MockSchemaRegistry {
    async fn register(
        &self,
        subject: &str,
        schema: &Schema,
        _definition: &str,
    ) -> Result<SchemaId> {
        if self.unreachable {
            return Err(Error::Binding("schema registry unreachable".to_string()));
        }

        lock(&self.registrations).push(subject.to_string());
        let key = (subject.to_string(), schema.canonical_form());
        let id = *lock(&self.ids)
            .entry(key)
            .or_insert_with(|| SchemaId(self.next_id.fetch_add(1, Ordering::SeqCst)));
        Ok(id)
    }
}

// ============================================================================
// Record sink
// ============================================================================

#[derive(Default)]
struct SinkState {
    records: Mutex<Vec<OutboundRecord>>,
    flushes: AtomicUsize,
    opened: AtomicUsize,
}

/// Opens sinks that acknowledge every record immediately unless told
/// otherwise. All sinks opened by one factory share their recorded state.
#[derive(Default)]
pub struct MockSinkFactory {
    state: Arc<SinkState>,
    stuck: usize,
    fail_deliveries: bool,
}

impl MockSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushes report `count` records that never get acknowledged.
    pub fn with_stuck_records(mut self, count: usize) -> Self {
        self.stuck = count;
        self
    }

    /// Every delivery report is a failure.
    pub fn failing_deliveries(mut self) -> Self {
        self.fail_deliveries = true;
        self
    }

    pub fn records(&self) -> Vec<OutboundRecord> {
        lock(&self.state.records).clone()
    }

    pub fn flush_calls(&self) -> usize {
        self.state.flushes.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }
}

impl SinkFactory for MockSinkFactory {
    fn open(&self, reports: DeliverySender) -> Result<Box<dyn RecordSink>> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSink {
            state: Arc::clone(&self.state),
            stuck: self.stuck,
            fail_deliveries: self.fail_deliveries,
            reports,
        }))
    }
}

pub struct MockSink {
    state: Arc<SinkState>,
    stuck: usize,
    fail_deliveries: bool,
    reports: DeliverySender,
}

#[async_trait]
impl RecordSink for MockSink {
    async fn send(&self, record: OutboundRecord) -> Result<()> {
        let report = {
            let mut records = lock(&self.state.records);
            let status = if self.fail_deliveries {
                DeliveryStatus::Failed("Broker: Unknown topic or partition".to_string())
            } else {
                DeliveryStatus::Delivered {
                    partition: 0,
                    offset: records.len() as i64,
                }
            };
            let report = DeliveryReport {
                topic: record.topic.clone(),
                timestamp_ms: record.timestamp_ms,
                status,
            };
            records.push(record);
            report
        };
        let _ = self.reports.send(report);
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> usize {
        self.state.flushes.fetch_add(1, Ordering::SeqCst);
        self.stuck
    }
}

// ============================================================================
// Kafka Connect
// ============================================================================

#[derive(Default)]
pub struct MockConnectClient {
    existing: HashSet<String>,
    rejection: Option<(u16, String)>,
    gets: Mutex<Vec<String>>,
    posts: Mutex<Vec<ConnectorRequest>>,
}

impl MockConnectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that answers 200 on GET.
    pub fn with_existing(mut self, name: &str) -> Self {
        self.existing.insert(name.to_string());
        self
    }

    /// POST answers with this status and body.
    pub fn rejecting_with(mut self, status: u16, body: &str) -> Self {
        self.rejection = Some((status, body.to_string()));
        self
    }

    pub fn get_calls(&self) -> Vec<String> {
        lock(&self.gets).clone()
    }

    pub fn posted(&self) -> Vec<ConnectorRequest> {
        lock(&self.posts).clone()
    }
}

#[async_trait]
impl ConnectClient for MockConnectClient {
    async fn connector_exists(&self, name: &str) -> Result<bool> {
        lock(&self.gets).push(name.to_string());
        Ok(self.existing.contains(name))
    }

    async fn create_connector(&self, request: &ConnectorRequest) -> Result<()> {
        lock(&self.posts).push(request.clone());
        match &self.rejection {
            Some((status, body)) => Err(Error::Connector {
                status: *status,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }
}

// ============================================================================
// HTTP endpoint
// ============================================================================

/// One request received by a [`CannedHttpServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Loopback HTTP endpoint that answers connections in order with canned
/// `(status, json body)` responses, one per connection, then stops
/// accepting.
pub struct CannedHttpServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl CannedHttpServer {
    pub async fn start(responses: Vec<(u16, String)>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                lock(&recorded).push(request);

                let reason = reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Ok(Self {
            addr,
            requests,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }
}

impl Drop for CannedHttpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).to_string();

    Some(RecordedRequest { method, path, body })
}
