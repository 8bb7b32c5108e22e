use super::delivery::{DeliveryReport, DeliverySender, DeliveryStatus};
use crate::config::KafkaConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, warn};

const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// A serialized record ready to hand to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub timestamp_ms: i64,
}

/// Data-plane connection owned by a single producer.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Queues a record for delivery. Returns once it is queued, not once it
    /// is acknowledged; the outcome arrives as a [`DeliveryReport`].
    async fn send(&self, record: OutboundRecord) -> Result<()>;

    /// Waits up to `timeout` for queued records and returns how many are
    /// still pending afterwards.
    async fn flush(&self, timeout: Duration) -> usize;
}

/// Opens one [`RecordSink`] per producer.
pub trait SinkFactory: Send + Sync {
    fn open(&self, reports: DeliverySender) -> Result<Box<dyn RecordSink>>;
}

pub struct KafkaSink {
    producer: FutureProducer,
    reports: DeliverySender,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig, reports: DeliverySender) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("compression.type", &config.compression)
            .set("acks", &config.acks)
            .set("linger.ms", config.linger_ms.to_string())
            .set("batch.size", config.batch_size.to_string())
            .set(
                "queue.buffering.max.messages",
                config.queue_buffering_max_messages.to_string(),
            )
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self { producer, reports })
    }
}

#[async_trait]
impl RecordSink for KafkaSink {
    async fn send(&self, record: OutboundRecord) -> Result<()> {
        let OutboundRecord {
            topic,
            key,
            value,
            timestamp_ms,
        } = record;
        let report_topic = topic.clone();

        let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&topic)
            .key(key.as_slice())
            .timestamp(timestamp_ms);
        if let Some(value) = value.as_deref() {
            future_record = future_record.payload(value);
        }

        loop {
            match self.producer.send_result(future_record) {
                Ok(delivery) => {
                    let reports = self.reports.clone();
                    tokio::spawn(async move {
                        let status = match delivery.await {
                            Ok(Ok((partition, offset))) => {
                                DeliveryStatus::Delivered { partition, offset }
                            }
                            Ok(Err((e, _message))) => {
                                warn!("Delivery to '{}' failed: {}", report_topic, e);
                                DeliveryStatus::Failed(e.to_string())
                            }
                            Err(_) => DeliveryStatus::Failed("delivery canceled".to_string()),
                        };
                        let _ = reports.send(DeliveryReport {
                            topic: report_topic,
                            timestamp_ms,
                            status,
                        });
                    });
                    return Ok(());
                }
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    debug!("Producer queue full, backing off");
                    future_record = returned;
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((e, _)) => return Err(Error::Kafka(e)),
            }
        }
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            let result = producer.flush(Timeout::After(timeout));
            (result, producer.in_flight_count())
        })
        .await;

        match flushed {
            Ok((Ok(()), pending)) => pending.max(0) as usize,
            Ok((Err(e), pending)) => {
                warn!("Flush did not complete: {}", e);
                pending.max(0) as usize
            }
            Err(e) => {
                warn!("Flush task failed: {}", e);
                self.producer.in_flight_count().max(0) as usize
            }
        }
    }
}

pub struct KafkaSinkFactory {
    config: KafkaConfig,
}

impl KafkaSinkFactory {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

impl SinkFactory for KafkaSinkFactory {
    fn open(&self, reports: DeliverySender) -> Result<Box<dyn RecordSink>> {
        Ok(Box::new(KafkaSink::new(&self.config, reports)?))
    }
}
