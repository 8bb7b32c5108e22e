//! Schema-governed producer bound to a single provisioned topic.
//!
//! A [`StreamProducer`] moves through `Uninitialized → Provisioned → Active →
//! Closed`. Construction provisions the topic through the shared
//! [`TopicProvisioner`], binds the stream's schemas and opens a broker
//! connection; only then can records be published. Closing drains buffered
//! records, bounded by the context's drain timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use stream_producer::kafka::{ProducerContext, StreamProducer, StreamSpec};
//! use stream_producer::Config;
//!
//! # async fn example() -> stream_producer::Result<()> {
//! let (context, mut reports) = ProducerContext::from_config(&Config::default())?;
//!
//! let spec = StreamSpec::new("org.chicago.cta.stations", r#"{"type":"long"}"#);
//! let mut producer = StreamProducer::new(spec, &context).await?;
//!
//! producer.publish_raw(&40_380_i64, Some(b"Clark/Lake".as_slice())).await?;
//! producer.close().await;
//!
//! while let Some(report) = reports.try_recv() {
//!     println!("{:?}", report.status);
//! }
//! # Ok(())
//! # }
//! ```

use super::delivery::{self, DeliveryReports, DeliverySender};
use super::serializer::SerializationContext;
use super::sink::{KafkaSinkFactory, OutboundRecord, RecordSink, SinkFactory};
use super::topic_manager::{KafkaTopicAdmin, ProvisionOutcome, TopicProvisioner};
use crate::config::{Config, ProvisioningPolicy, StreamConfig, TopicSettings};
use crate::schema_registry::{HttpSchemaRegistry, SchemaBinding, SchemaRegistry};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn time_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Declaration of a stream: its topic, schemas and topic settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub key_schema: String,
    pub value_schema: Option<String>,
    pub settings: TopicSettings,
}

impl StreamSpec {
    pub fn new(name: impl Into<String>, key_schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_schema: key_schema.into(),
            value_schema: None,
            settings: TopicSettings::default(),
        }
    }

    pub fn with_value_schema(mut self, value_schema: impl Into<String>) -> Self {
        self.value_schema = Some(value_schema.into());
        self
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.settings.partitions = partitions;
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.settings.replicas = replicas;
        self
    }

    pub fn with_settings(mut self, settings: TopicSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds a spec from a configured stream, reading its schema files.
    pub async fn from_config(stream: &StreamConfig, defaults: &TopicSettings) -> Result<Self> {
        let key_schema = tokio::fs::read_to_string(&stream.key_schema_file).await?;
        let value_schema = match &stream.value_schema_file {
            Some(path) => Some(tokio::fs::read_to_string(path).await?),
            None => None,
        };

        Ok(Self {
            name: stream.name.clone(),
            key_schema,
            value_schema,
            settings: stream.topic_settings(defaults),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("stream name must not be empty".to_string()));
        }
        self.settings.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Uninitialized,
    Provisioned,
    Active,
    Closed,
}

/// Result of [`StreamProducer::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every buffered record was acknowledged or failed before the deadline.
    Drained,
    /// The drain deadline passed; `pending` records were dropped.
    TimedOut { pending: usize },
    /// The producer had already been closed; nothing was done.
    AlreadyClosed,
}

/// Everything producers share: the provisioner, schema binding, a way to
/// open broker connections and the delivery report channel.
#[derive(Clone)]
pub struct ProducerContext {
    provisioner: Arc<TopicProvisioner>,
    binding: SchemaBinding,
    sinks: Arc<dyn SinkFactory>,
    reports: DeliverySender,
    policy: ProvisioningPolicy,
    drain_timeout: Duration,
}

impl ProducerContext {
    pub fn new(
        provisioner: Arc<TopicProvisioner>,
        registry: Arc<dyn SchemaRegistry>,
        sinks: Arc<dyn SinkFactory>,
    ) -> (Self, DeliveryReports) {
        let (reports, receiver) = delivery::channel();
        let context = Self {
            provisioner,
            binding: SchemaBinding::new(registry),
            sinks,
            reports,
            policy: ProvisioningPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        };
        (context, receiver)
    }

    /// Wires Kafka admin, Kafka producers and the HTTP schema registry from
    /// configuration.
    pub fn from_config(config: &Config) -> Result<(Self, DeliveryReports)> {
        config.validate()?;

        let admin = KafkaTopicAdmin::new(&config.kafka.brokers, config.kafka.admin_timeout())?;
        let registry = HttpSchemaRegistry::new(&config.schema_registry)?;
        let sinks = KafkaSinkFactory::new(config.kafka.clone());

        let (context, reports) = Self::new(
            Arc::new(TopicProvisioner::new(Arc::new(admin))),
            Arc::new(registry),
            Arc::new(sinks),
        );
        Ok((
            context
                .with_policy(config.producer.provisioning_policy)
                .with_drain_timeout(config.producer.drain_timeout()),
            reports,
        ))
    }

    pub fn with_policy(mut self, policy: ProvisioningPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn provisioner(&self) -> &Arc<TopicProvisioner> {
        &self.provisioner
    }
}

pub struct StreamProducer {
    spec: StreamSpec,
    state: ProducerState,
    provision: ProvisionOutcome,
    serializer: SerializationContext,
    sink: Box<dyn RecordSink>,
    drain_timeout: Duration,
    published: AtomicU64,
}

impl StreamProducer {
    /// Provisions the topic, binds schemas and opens the broker connection.
    ///
    /// Schema binding runs on every construction, even when the topic was
    /// already provisioned by another producer.
    pub async fn new(spec: StreamSpec, context: &ProducerContext) -> Result<Self> {
        spec.validate()?;
        let mut state = ProducerState::Uninitialized;
        debug!(topic = %spec.name, ?state, "Constructing producer");

        let provision = context
            .provisioner
            .ensure_topic(&spec.name, &spec.settings)
            .await;
        if let ProvisionOutcome::Failed(message) = &provision {
            match context.policy {
                ProvisioningPolicy::FailFast => {
                    return Err(Error::Provisioning {
                        topic: spec.name.clone(),
                        message: message.clone(),
                    });
                }
                ProvisioningPolicy::BestEffort => {
                    warn!(
                        topic = %spec.name,
                        "Continuing without a provisioned topic; publishing may fail"
                    );
                }
            }
        }
        state = ProducerState::Provisioned;
        debug!(topic = %spec.name, ?state, ?provision, "Topic provisioning done");

        let serializer = context
            .binding
            .bind(&spec.name, &spec.key_schema, spec.value_schema.as_deref())
            .await?;
        let sink = context.sinks.open(context.reports.clone())?;
        state = ProducerState::Active;

        info!(
            topic = %spec.name,
            key_schema_id = %serializer.key_schema_id(),
            value_schema_id = ?serializer.value_schema_id(),
            "Producer ready"
        );

        Ok(Self {
            spec,
            state,
            provision,
            serializer,
            sink,
            drain_timeout: context.drain_timeout,
            published: AtomicU64::new(0),
        })
    }

    pub fn topic(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn provision_outcome(&self) -> &ProvisionOutcome {
        &self.provision
    }

    pub fn serializer(&self) -> &SerializationContext {
        &self.serializer
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn time_millis() -> i64 {
        time_millis()
    }

    /// Encodes `key` and `value` and queues the record.
    ///
    /// The value is Avro-encoded when the stream has a value schema and
    /// written as JSON otherwise.
    pub async fn publish<K, V>(&self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        self.ensure_active()?;
        let key = self.serializer.encode_key(key)?;
        let value = self.serializer.encode_value(value)?;
        self.dispatch(key, Some(value)).await
    }

    /// Encodes `key` and queues the record with `value` untouched.
    pub async fn publish_raw<K>(&self, key: &K, value: Option<&[u8]>) -> Result<()>
    where
        K: Serialize + ?Sized,
    {
        self.ensure_active()?;
        let key = self.serializer.encode_key(key)?;
        self.dispatch(key, value.map(<[u8]>::to_vec)).await
    }

    /// Flushes buffered records and closes the producer.
    ///
    /// Safe to call repeatedly; later calls return
    /// [`DrainOutcome::AlreadyClosed`] without touching the connection.
    pub async fn close(&mut self) -> DrainOutcome {
        if self.state == ProducerState::Closed {
            debug!(topic = %self.spec.name, "Producer already closed");
            return DrainOutcome::AlreadyClosed;
        }

        info!(topic = %self.spec.name, "Closing producer, draining buffered records");
        let pending = self.sink.flush(self.drain_timeout).await;
        self.state = ProducerState::Closed;

        if pending == 0 {
            info!(
                topic = %self.spec.name,
                published = self.published(),
                "Producer closed"
            );
            DrainOutcome::Drained
        } else {
            warn!(
                topic = %self.spec.name,
                pending,
                timeout_secs = self.drain_timeout.as_secs(),
                "Drain timed out, dropping pending records"
            );
            DrainOutcome::TimedOut { pending }
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != ProducerState::Active {
            return Err(Error::InvalidState {
                message: format!(
                    "cannot publish to '{}' while {:?}",
                    self.spec.name, self.state
                ),
            });
        }
        Ok(())
    }

    async fn dispatch(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        let record = OutboundRecord {
            topic: self.spec.name.clone(),
            key,
            value,
            timestamp_ms: time_millis(),
        };
        self.sink.send(record).await?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for StreamProducer {
    fn drop(&mut self) {
        if self.state == ProducerState::Active {
            warn!(
                topic = %self.spec.name,
                "Producer dropped without close; buffered records may be lost"
            );
        }
    }
}
