use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub schema_registry: SchemaRegistryConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub topic_defaults: TopicSettings,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    #[serde(default = "default_producer_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_queue_buffering_max_messages")]
    pub queue_buffering_max_messages: usize,
    /// How long a record may wait for acknowledgment before it is reported
    /// as failed.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u32,
    #[serde(default = "default_admin_timeout_secs")]
    pub admin_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaRegistryConfig {
    #[serde(default = "default_schema_registry_url")]
    pub url: String,
    #[serde(default = "default_registry_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    #[serde(default)]
    pub provisioning_policy: ProvisioningPolicy,
}

/// What a producer does when its topic could not be provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningPolicy {
    /// Log the failure and keep constructing; publishing may fail later.
    #[default]
    BestEffort,
    /// Refuse to construct the producer.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum CleanupPolicy {
    #[default]
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "compact,delete")]
    CompactDelete,
}

impl CleanupPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupPolicy::Delete => "delete",
            CleanupPolicy::Compact => "compact",
            CleanupPolicy::CompactDelete => "compact,delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Keep whatever codec the producer used.
    Producer,
    Uncompressed,
    Gzip,
    Snappy,
    #[default]
    Lz4,
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Producer => "producer",
            Compression::Uncompressed => "uncompressed",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

/// Partitioning and retention settings a topic is created with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TopicSettings {
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub cleanup_policy: CleanupPolicy,
    #[serde(default)]
    pub retention_ms: Option<i64>,
    #[serde(default = "default_delete_retention_ms")]
    pub delete_retention_ms: i64,
    #[serde(default = "default_file_delete_delay_ms")]
    pub file_delete_delay_ms: i64,
    #[serde(default)]
    pub compression: Compression,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            replicas: default_replicas(),
            cleanup_policy: CleanupPolicy::default(),
            retention_ms: None,
            delete_retention_ms: default_delete_retention_ms(),
            file_delete_delay_ms: default_file_delete_delay_ms(),
            compression: Compression::default(),
        }
    }
}

impl TopicSettings {
    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions < 1 {
            return Err(Error::Config(format!(
                "partitions must be at least 1, got {}",
                self.partitions
            )));
        }
        if self.replicas < 1 {
            return Err(Error::Config(format!(
                "replicas must be at least 1, got {}",
                self.replicas
            )));
        }
        if matches!(self.retention_ms, Some(ms) if ms < -1) {
            return Err(Error::Config(
                "retention_ms must be -1 (unlimited) or positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Broker-side topic configuration entries.
    pub fn topic_config(&self) -> BTreeMap<&'static str, String> {
        let mut entries = BTreeMap::new();
        entries.insert("cleanup.policy", self.cleanup_policy.as_str().to_string());
        entries.insert("compression.type", self.compression.as_str().to_string());
        entries.insert("delete.retention.ms", self.delete_retention_ms.to_string());
        entries.insert("file.delete.delay.ms", self.file_delete_delay_ms.to_string());
        if let Some(retention_ms) = self.retention_ms {
            entries.insert("retention.ms", retention_ms.to_string());
        }
        entries
    }
}

/// Kafka Connect JDBC source connector settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorConfig {
    #[serde(default = "default_connect_url")]
    pub connect_url: String,
    #[serde(default = "default_connector_name")]
    pub name: String,
    #[serde(default = "default_connector_class")]
    pub connector_class: String,
    #[serde(default = "default_connector_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_connector_mode")]
    pub mode: String,
    #[serde(default = "default_incrementing_column")]
    pub incrementing_column: String,
    #[serde(default = "default_table_whitelist")]
    pub table_whitelist: String,
    #[serde(default = "default_batch_max_rows")]
    pub batch_max_rows: u32,
    #[serde(default = "default_tasks_max")]
    pub tasks_max: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_jdbc_url")]
    pub connection_url: String,
    #[serde(default = "default_jdbc_user")]
    pub connection_user: String,
    #[serde(default)]
    pub connection_password: String,
    #[serde(default = "default_json_converter")]
    pub key_converter: String,
    #[serde(default = "default_json_converter")]
    pub value_converter: String,
    #[serde(default)]
    pub converter_schemas_enable: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub timeout_secs: u64,
}

/// A stream declared in the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    pub name: String,
    pub key_schema_file: PathBuf,
    #[serde(default)]
    pub value_schema_file: Option<PathBuf>,
    #[serde(default)]
    pub partitions: Option<i32>,
    #[serde(default)]
    pub replicas: Option<i32>,
}

impl StreamConfig {
    /// Topic settings for this stream, layered over the configured defaults.
    pub fn topic_settings(&self, defaults: &TopicSettings) -> TopicSettings {
        let mut settings = defaults.clone();
        if let Some(partitions) = self.partitions {
            settings.partitions = partitions;
        }
        if let Some(replicas) = self.replicas {
            settings.replicas = replicas;
        }
        settings
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("STREAM_PRODUCER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.is_empty() {
            return Err(Error::Config("kafka.brokers must not be empty".to_string()));
        }
        if self.kafka.message_timeout_ms == 0 {
            return Err(Error::Config(
                "kafka.message_timeout_ms must be positive".to_string(),
            ));
        }
        if self.kafka.admin_timeout_secs == 0 {
            return Err(Error::Config(
                "kafka.admin_timeout_secs must be positive".to_string(),
            ));
        }
        if self.producer.drain_timeout_secs == 0 {
            return Err(Error::Config(
                "producer.drain_timeout_secs must be positive".to_string(),
            ));
        }
        if self.schema_registry.timeout_secs == 0 || self.connector.timeout_secs == 0 {
            return Err(Error::Config(
                "schema_registry and connector timeouts must be positive".to_string(),
            ));
        }
        self.topic_defaults.validate()?;

        for stream in &self.streams {
            if stream.name.trim().is_empty() {
                return Err(Error::Config("stream name must not be empty".to_string()));
            }
            stream.topic_settings(&self.topic_defaults).validate()?;
        }
        Ok(())
    }

    pub fn bootstrap_servers(&self) -> String {
        self.kafka.brokers.join(",")
    }

    pub fn stream(&self, name: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.name == name)
    }
}

impl KafkaConfig {
    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_secs)
    }
}

impl ProducerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            compression: default_producer_compression(),
            acks: default_acks(),
            linger_ms: default_linger_ms(),
            batch_size: default_batch_size(),
            queue_buffering_max_messages: default_queue_buffering_max_messages(),
            message_timeout_ms: default_message_timeout_ms(),
            admin_timeout_secs: default_admin_timeout_secs(),
        }
    }
}

impl Default for SchemaRegistryConfig {
    fn default() -> Self {
        Self {
            url: default_schema_registry_url(),
            timeout_secs: default_registry_timeout_secs(),
            username: None,
            password: None,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout_secs(),
            provisioning_policy: ProvisioningPolicy::default(),
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_url: default_connect_url(),
            name: default_connector_name(),
            connector_class: default_connector_class(),
            topic_prefix: default_connector_topic_prefix(),
            mode: default_connector_mode(),
            incrementing_column: default_incrementing_column(),
            table_whitelist: default_table_whitelist(),
            batch_max_rows: default_batch_max_rows(),
            tasks_max: default_tasks_max(),
            poll_interval_ms: default_poll_interval_ms(),
            connection_url: default_jdbc_url(),
            connection_user: default_jdbc_user(),
            connection_password: String::new(),
            key_converter: default_json_converter(),
            value_converter: default_json_converter(),
            converter_schemas_enable: false,
            timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_producer_compression() -> String {
    "lz4".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    100
}

fn default_batch_size() -> usize {
    16384
}

fn default_queue_buffering_max_messages() -> usize {
    100_000
}

fn default_message_timeout_ms() -> u32 {
    300_000
}

fn default_admin_timeout_secs() -> u64 {
    30
}

fn default_schema_registry_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_registry_timeout_secs() -> u64 {
    10
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_partitions() -> i32 {
    1
}

fn default_replicas() -> i32 {
    1
}

fn default_delete_retention_ms() -> i64 {
    2000
}

fn default_file_delete_delay_ms() -> i64 {
    2000
}

fn default_connect_url() -> String {
    "http://localhost:8083".to_string()
}

fn default_connector_name() -> String {
    "stations".to_string()
}

fn default_connector_class() -> String {
    "io.confluent.connect.jdbc.JdbcSourceConnector".to_string()
}

fn default_connector_topic_prefix() -> String {
    "org.chicago.cta.".to_string()
}

fn default_connector_mode() -> String {
    "incrementing".to_string()
}

fn default_incrementing_column() -> String {
    "stop_id".to_string()
}

fn default_table_whitelist() -> String {
    "stations".to_string()
}

fn default_batch_max_rows() -> u32 {
    500
}

fn default_tasks_max() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    50_000 // infrequent: the stations table rarely changes
}

fn default_jdbc_url() -> String {
    "jdbc:postgresql://localhost:5432/cta".to_string()
}

fn default_jdbc_user() -> String {
    "cta_admin".to_string()
}

fn default_json_converter() -> String {
    "org.apache.kafka.connect.json.JsonConverter".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_match_transit_setup() {
        let config = Config::default();

        assert_eq!(config.kafka.brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(config.schema_registry.url, "http://localhost:8081");
        assert_eq!(config.producer.provisioning_policy, ProvisioningPolicy::BestEffort);
        assert_eq!(config.producer.drain_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_topic_config_entries() {
        let entries = TopicSettings::default().topic_config();

        assert_eq!(entries["cleanup.policy"], "delete");
        assert_eq!(entries["compression.type"], "lz4");
        assert_eq!(entries["delete.retention.ms"], "2000");
        assert_eq!(entries["file.delete.delay.ms"], "2000");
        assert!(!entries.contains_key("retention.ms"));

        let compacted = TopicSettings {
            cleanup_policy: CleanupPolicy::CompactDelete,
            retention_ms: Some(604_800_000),
            ..TopicSettings::default()
        };
        let entries = compacted.topic_config();
        assert_eq!(entries["cleanup.policy"], "compact,delete");
        assert_eq!(entries["retention.ms"], "604800000");
    }

    #[test]
    fn test_topic_settings_validation() {
        assert!(TopicSettings::default().with_partitions(0).validate().is_err());
        assert!(TopicSettings::default().with_replicas(0).validate().is_err());
        assert!(TopicSettings::default()
            .with_partitions(3)
            .with_replicas(2)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [kafka]
            brokers = ["broker-1:9092", "broker-2:9092"]

            [producer]
            drain_timeout_secs = 5
            provisioning_policy = "fail_fast"

            [topic_defaults]
            cleanup_policy = "compact"

            [[streams]]
            name = "org.chicago.cta.weather.v1"
            key_schema_file = "schemas/weather_key.json"
            value_schema_file = "schemas/weather_value.json"
            partitions = 3
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.bootstrap_servers(), "broker-1:9092,broker-2:9092");
        assert_eq!(config.producer.provisioning_policy, ProvisioningPolicy::FailFast);
        assert_eq!(config.topic_defaults.cleanup_policy, CleanupPolicy::Compact);

        let stream = config.stream("org.chicago.cta.weather.v1").unwrap();
        let settings = stream.topic_settings(&config.topic_defaults);
        assert_eq!(settings.partitions, 3);
        assert_eq!(settings.replicas, 1);
        assert_eq!(settings.cleanup_policy, CleanupPolicy::Compact);
    }

    #[test]
    fn test_load_rejects_invalid_stream() {
        let file = write_config(
            r#"
            [[streams]]
            name = "stations"
            key_schema_file = "schemas/station_key.json"
            replicas = 0
            "#,
        );

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
        let config = Config::from_file(path).unwrap();

        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.connector.name, "stations");
        assert_eq!(config.connector.table_whitelist, "stations");
        assert!(config
            .streams
            .iter()
            .all(|s| s.key_schema_file.ends_with("station_key.json")));
    }
}
