#![allow(dead_code)]

use std::env;
use std::sync::Arc;
use stream_producer::config::{Config, KafkaConfig, SchemaRegistryConfig};
use stream_producer::kafka::{DeliveryReports, ProducerContext, TopicProvisioner};
use stream_producer::testing::{MockSchemaRegistry, MockSinkFactory, MockTopicAdmin};

pub const LONG_KEY: &str = r#"{"type":"long"}"#;

pub const WEATHER_VALUE: &str = r#"{
    "type": "record",
    "name": "weather",
    "namespace": "com.udacity",
    "fields": [
        {"name": "temperature", "type": "double"},
        {"name": "status", "type": "string"}
    ]
}"#;

/// Producer context wired to in-process mocks.
pub struct MockedContext {
    pub admin: Arc<MockTopicAdmin>,
    pub registry: Arc<MockSchemaRegistry>,
    pub sinks: Arc<MockSinkFactory>,
    pub context: ProducerContext,
    pub reports: DeliveryReports,
}

pub fn mocked_context(admin: MockTopicAdmin) -> MockedContext {
    let admin = Arc::new(admin);
    let registry = Arc::new(MockSchemaRegistry::new());
    let sinks = Arc::new(MockSinkFactory::new());
    let (context, reports) = ProducerContext::new(
        Arc::new(TopicProvisioner::new(admin.clone())),
        registry.clone(),
        sinks.clone(),
    );
    MockedContext {
        admin,
        registry,
        sinks,
        context,
        reports,
    }
}

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    // Use TEST_ prefix for test environment variables
    let kafka = KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
        compression: "none".to_string(), // No compression for tests
        acks: "all".to_string(),
        linger_ms: 0, // Immediate sending for tests
        ..KafkaConfig::default()
    };

    let schema_registry = SchemaRegistryConfig {
        url: env::var("TEST_SCHEMA_REGISTRY_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string()),
        ..SchemaRegistryConfig::default()
    };

    Config {
        kafka,
        schema_registry,
        ..Config::default()
    }
}

pub fn unique_topic(prefix: &str) -> String {
    format!("{}_{}_{}", prefix, std::process::id(), stream_producer::kafka::time_millis())
}
