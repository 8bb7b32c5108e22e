mod common;

use common::{get_test_config, unique_topic, LONG_KEY, WEATHER_VALUE};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use serde_json::json;
use std::time::Duration;
use stream_producer::kafka::{unframe, DrainOutcome, KafkaTopicAdmin, ProvisionOutcome};
use stream_producer::{Config, ProducerContext, StreamProducer, StreamSpec};
use tokio::time::timeout;
use tracing::info;

#[tokio::test]
#[ignore] // Run with: cargo test --ignored integration_test::test_end_to_end_publish
async fn test_end_to_end_publish() {
    tracing_subscriber::fmt()
        .with_env_filter("stream_producer=debug,rdkafka=info")
        .try_init()
        .ok();

    let config = get_test_config();
    let topic = unique_topic("weather");
    let (context, mut reports) = ProducerContext::from_config(&config).unwrap();

    let spec = StreamSpec::new(topic.clone(), LONG_KEY).with_value_schema(WEATHER_VALUE);
    let mut producer = StreamProducer::new(spec, &context).await.unwrap();
    assert_eq!(producer.provision_outcome(), &ProvisionOutcome::Created);

    producer
        .publish(&7_i64, &json!({"temperature": 71.5, "status": "sunny"}))
        .await
        .unwrap();
    assert_eq!(producer.close().await, DrainOutcome::Drained);

    let report = timeout(Duration::from_secs(10), reports.recv())
        .await
        .expect("No delivery report")
        .unwrap();
    assert!(report.is_delivered());

    let consumer = create_test_consumer(&config, &topic);
    let message = timeout(Duration::from_secs(10), consumer.recv())
        .await
        .expect("Timed out waiting for message")
        .unwrap();

    let key = message.key().expect("Message has no key");
    assert_eq!(
        producer.serializer().decode_key(key).unwrap(),
        apache_avro::types::Value::Long(7)
    );

    let (schema_id, _) = unframe(message.payload().expect("Message has no value")).unwrap();
    assert_eq!(Some(schema_id), producer.serializer().value_schema_id());
    info!("Consumed framed record with value schema {}", schema_id);

    cleanup_topic(&config, &topic).await;
}

#[tokio::test]
#[ignore] // Run with: cargo test --ignored integration_test::test_existing_topic_is_reused
async fn test_existing_topic_is_reused() {
    let config = get_test_config();
    let topic = unique_topic("stations");

    // Separate contexts simulate separate processes
    for expected in [ProvisionOutcome::Created, ProvisionOutcome::AlreadyExists] {
        let (context, _reports) = ProducerContext::from_config(&config).unwrap();
        let mut producer = StreamProducer::new(StreamSpec::new(topic.clone(), LONG_KEY), &context)
            .await
            .unwrap();
        assert_eq!(producer.provision_outcome(), &expected);
        producer.close().await;
    }

    let admin = KafkaTopicAdmin::new(&config.kafka.brokers, config.kafka.admin_timeout()).unwrap();
    assert!(admin.topic_exists(&topic).await.unwrap());

    cleanup_topic(&config, &topic).await;
}

fn create_test_consumer(config: &Config, topic: &str) -> StreamConsumer {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("group.id", format!("test_consumer_{}", std::process::id()))
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .create()
        .expect("Failed to create consumer");

    consumer
        .subscribe(&[topic])
        .expect("Failed to subscribe to topic");

    consumer
}

async fn cleanup_topic(config: &Config, topic: &str) {
    let admin = KafkaTopicAdmin::new(&config.kafka.brokers, config.kafka.admin_timeout()).unwrap();
    admin.delete_topic(topic).await.ok();
}
