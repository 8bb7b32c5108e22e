use crate::config::TopicSettings;
use crate::{Error, Result};
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::ClientConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Broker answer to a create-topic request that is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTopicResult {
    Created,
    AlreadyExists,
}

/// Administrative side of the broker.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn create_topic(&self, name: &str, settings: &TopicSettings) -> Result<CreateTopicResult>;
}

pub struct KafkaTopicAdmin {
    admin_client: AdminClient<DefaultClientContext>,
    operation_timeout: Duration,
}

impl KafkaTopicAdmin {
    pub fn new(brokers: &[String], operation_timeout: Duration) -> Result<Self> {
        let admin_client: AdminClient<_> = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            admin_client,
            operation_timeout,
        })
    }

    pub async fn topic_exists(&self, topic_name: &str) -> Result<bool> {
        let metadata = self
            .admin_client
            .inner()
            .fetch_metadata(Some(topic_name), self.operation_timeout)
            .map_err(Error::Kafka)?;

        Ok(metadata
            .topics()
            .iter()
            .any(|topic| topic.name() == topic_name && topic.error().is_none()))
    }

    pub async fn delete_topic(&self, topic_name: &str) -> Result<()> {
        let opts = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = self
            .admin_client
            .delete_topics(&[topic_name], &opts)
            .await
            .map_err(Error::Kafka)?;

        for result in results {
            match result {
                Ok(topic) => {
                    info!("Successfully deleted topic: {}", topic);
                }
                Err((_topic, error)) => {
                    return Err(Error::Kafka(KafkaError::AdminOp(error)));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn create_topic(&self, name: &str, settings: &TopicSettings) -> Result<CreateTopicResult> {
        let topic_config = settings.topic_config();
        let mut new_topic = NewTopic::new(
            name,
            settings.partitions,
            TopicReplication::Fixed(settings.replicas),
        );
        for (key, value) in &topic_config {
            new_topic = new_topic.set(key, value);
        }

        let opts = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = self
            .admin_client
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(Error::Kafka)?;

        match results.into_iter().next() {
            Some(Ok(_)) => Ok(CreateTopicResult::Created),
            Some(Err((_topic, RDKafkaErrorCode::TopicAlreadyExists))) => {
                Ok(CreateTopicResult::AlreadyExists)
            }
            Some(Err((_topic, error))) => Err(Error::Kafka(KafkaError::AdminOp(error))),
            None => Err(Error::Kafka(KafkaError::AdminOpCreation(format!(
                "no result returned for topic '{}'",
                name
            )))),
        }
    }
}

/// What [`TopicProvisioner::ensure_topic`] did for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Already in the registry; no broker call was made.
    Cached,
    Created,
    AlreadyExists,
    /// Broker call failed; the topic was not registered and the next call
    /// will try again.
    Failed(String),
}

impl ProvisionOutcome {
    pub fn is_provisioned(&self) -> bool {
        !matches!(self, ProvisionOutcome::Failed(_))
    }
}

/// Makes sure topics exist before anyone publishes to them.
///
/// Holds the registry of topics confirmed to exist. Share one provisioner
/// between all producers that should deduplicate provisioning.
pub struct TopicProvisioner {
    admin: Arc<dyn TopicAdmin>,
    registry: Mutex<HashMap<String, TopicSettings>>,
}

impl TopicProvisioner {
    pub fn new(admin: Arc<dyn TopicAdmin>) -> Self {
        Self {
            admin,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Creates `name` with `settings` unless it is already registered.
    ///
    /// Never fails: broker errors other than "already exists" are logged and
    /// returned as [`ProvisionOutcome::Failed`]. The registry lock is held
    /// across the broker call so concurrent callers for the same name issue a
    /// single request.
    #[instrument(skip(self, settings), fields(topic = %name))]
    pub async fn ensure_topic(&self, name: &str, settings: &TopicSettings) -> ProvisionOutcome {
        let mut registry = self.registry.lock().await;

        if let Some(provisioned) = registry.get(name) {
            if provisioned != settings {
                warn!(
                    "Topic '{}' redeclared with different settings; keeping {:?}",
                    name, provisioned
                );
            }
            debug!("Topic '{}' already provisioned", name);
            return ProvisionOutcome::Cached;
        }

        match self.admin.create_topic(name, settings).await {
            Ok(CreateTopicResult::Created) => {
                info!(
                    partitions = settings.partitions,
                    replicas = settings.replicas,
                    "Created topic '{}'",
                    name
                );
                registry.insert(name.to_string(), settings.clone());
                ProvisionOutcome::Created
            }
            Ok(CreateTopicResult::AlreadyExists) => {
                info!("Topic '{}' already exists", name);
                registry.insert(name.to_string(), settings.clone());
                ProvisionOutcome::AlreadyExists
            }
            Err(e) => {
                warn!("Failed to create topic '{}': {}", name, e);
                ProvisionOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn is_provisioned(&self, name: &str) -> bool {
        self.registry.lock().await.contains_key(name)
    }

    pub async fn provisioned_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.registry.lock().await.keys().cloned().collect();
        topics.sort();
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTopicAdmin;

    #[tokio::test]
    async fn test_second_call_is_cached() {
        let admin = Arc::new(MockTopicAdmin::new());
        let provisioner = TopicProvisioner::new(admin.clone());
        let settings = TopicSettings::default();

        assert_eq!(
            provisioner.ensure_topic("stations", &settings).await,
            ProvisionOutcome::Created
        );
        assert_eq!(
            provisioner.ensure_topic("stations", &settings).await,
            ProvisionOutcome::Cached
        );
        assert_eq!(admin.create_calls("stations"), 1);
    }

    #[tokio::test]
    async fn test_existing_topic_counts_as_provisioned() {
        let admin = Arc::new(MockTopicAdmin::new().with_existing("turnstiles"));
        let provisioner = TopicProvisioner::new(admin.clone());

        let outcome = provisioner
            .ensure_topic("turnstiles", &TopicSettings::default())
            .await;

        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
        assert!(outcome.is_provisioned());
        assert!(provisioner.is_provisioned("turnstiles").await);
    }

    #[tokio::test]
    async fn test_failure_is_retried_next_time() {
        let admin = Arc::new(MockTopicAdmin::new().failing_once("arrivals"));
        let provisioner = TopicProvisioner::new(admin.clone());
        let settings = TopicSettings::default();

        let first = provisioner.ensure_topic("arrivals", &settings).await;
        assert!(matches!(first, ProvisionOutcome::Failed(_)));
        assert!(!provisioner.is_provisioned("arrivals").await);

        let second = provisioner.ensure_topic("arrivals", &settings).await;
        assert_eq!(second, ProvisionOutcome::Created);
        assert_eq!(admin.create_calls("arrivals"), 2);
    }

    #[tokio::test]
    async fn test_settings_are_forwarded() {
        let admin = Arc::new(MockTopicAdmin::new());
        let provisioner = TopicProvisioner::new(admin.clone());
        let settings = TopicSettings::default().with_partitions(4).with_replicas(3);

        provisioner.ensure_topic("weather", &settings).await;

        assert_eq!(admin.created_settings("weather"), Some(settings));
        assert_eq!(provisioner.provisioned_topics().await, vec!["weather".to_string()]);
    }

    #[tokio::test]
    #[ignore] // Requires running Kafka
    async fn test_topic_creation() {
        let admin = Arc::new(
            KafkaTopicAdmin::new(&["localhost:9092".to_string()], Duration::from_secs(30))
                .unwrap(),
        );
        let topic_name = "test-topic-creation";

        // Clean up if exists
        let _ = admin.delete_topic(topic_name).await;

        let provisioner = TopicProvisioner::new(admin.clone());
        let outcome = provisioner
            .ensure_topic(topic_name, &TopicSettings::default().with_partitions(3))
            .await;
        assert_eq!(outcome, ProvisionOutcome::Created);

        // Broker says exists on a fresh registry
        let fresh = TopicProvisioner::new(admin.clone());
        let outcome = fresh
            .ensure_topic(topic_name, &TopicSettings::default())
            .await;
        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);

        assert!(admin.topic_exists(topic_name).await.unwrap());
        admin.delete_topic(topic_name).await.unwrap();
    }
}
