//! Kafka Connect JDBC source connector setup.
//!
//! Configuration is a one-shot, idempotent exchange with the Connect REST API:
//! `GET /connectors/{name}` answering 200 means the connector is already
//! there; anything else is followed by `POST /connectors`. A non-2xx answer to
//! the POST is fatal.
//!
//! # Example
//!
//! ```rust,no_run
//! use stream_producer::config::ConnectorConfig;
//! use stream_producer::connector::{configure_connector, HttpConnectClient};
//!
//! # async fn example() -> stream_producer::Result<()> {
//! let config = ConnectorConfig::default();
//! let client = HttpConnectClient::new(&config)?;
//! let outcome = configure_connector(&client, &config).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

use crate::config::ConnectorConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Body of `POST /connectors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorRequest {
    pub name: String,
    pub config: BTreeMap<String, String>,
}

impl ConnectorRequest {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        let schemas_enable = config.converter_schemas_enable.to_string();
        let entries = [
            ("connector.class", config.connector_class.clone()),
            ("topic.prefix", config.topic_prefix.clone()),
            ("mode", config.mode.clone()),
            ("incrementing.column.name", config.incrementing_column.clone()),
            ("table.whitelist", config.table_whitelist.clone()),
            ("batch.max.rows", config.batch_max_rows.to_string()),
            ("tasks.max", config.tasks_max.to_string()),
            ("poll.interval.ms", config.poll_interval_ms.to_string()),
            ("connection.url", config.connection_url.clone()),
            ("connection.user", config.connection_user.clone()),
            ("connection.password", config.connection_password.clone()),
            ("key.converter", config.key_converter.clone()),
            ("key.converter.schemas.enable", schemas_enable.clone()),
            ("value.converter", config.value_converter.clone()),
            ("value.converter.schemas.enable", schemas_enable),
        ];

        Self {
            name: config.name.clone(),
            config: entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }
}

/// Kafka Connect control plane.
#[async_trait]
pub trait ConnectClient: Send + Sync {
    async fn connector_exists(&self, name: &str) -> Result<bool>;
    async fn create_connector(&self, request: &ConnectorRequest) -> Result<()>;
}

pub struct HttpConnectClient {
    client: Client,
    base_url: String,
}

impl HttpConnectClient {
    pub fn new(config: &ConnectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.connect_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ConnectClient for HttpConnectClient {
    async fn connector_exists(&self, name: &str) -> Result<bool> {
        let url = format!("{}/connectors/{}", self.base_url, name);
        let response = self.client.get(&url).send().await?;
        debug!("GET {} returned {}", url, response.status());
        Ok(response.status() == StatusCode::OK)
    }

    async fn create_connector(&self, request: &ConnectorRequest) -> Result<()> {
        let url = format!("{}/connectors", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Connector {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorOutcome {
    AlreadyConfigured,
    Created,
}

/// Creates the connector unless Kafka Connect already knows it.
#[instrument(skip_all, fields(connector = %config.name))]
pub async fn configure_connector(
    client: &dyn ConnectClient,
    config: &ConnectorConfig,
) -> Result<ConnectorOutcome> {
    debug!("Creating or updating Kafka Connect connector");

    if client.connector_exists(&config.name).await? {
        info!("Connector '{}' already created, skipping", config.name);
        return Ok(ConnectorOutcome::AlreadyConfigured);
    }

    let request = ConnectorRequest::from_config(config);
    client.create_connector(&request).await?;

    info!(
        table = %config.table_whitelist,
        topic_prefix = %config.topic_prefix,
        "Connector '{}' created",
        config.name
    );
    Ok(ConnectorOutcome::Created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnectClient;

    #[test]
    fn test_request_body() {
        let request = ConnectorRequest::from_config(&ConnectorConfig::default());
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["name"], "stations");
        assert_eq!(
            body["config"]["connector.class"],
            "io.confluent.connect.jdbc.JdbcSourceConnector"
        );
        assert_eq!(body["config"]["mode"], "incrementing");
        assert_eq!(body["config"]["incrementing.column.name"], "stop_id");
        assert_eq!(body["config"]["table.whitelist"], "stations");
        assert_eq!(body["config"]["topic.prefix"], "org.chicago.cta.");
        assert_eq!(body["config"]["poll.interval.ms"], "50000");
        assert_eq!(body["config"]["key.converter.schemas.enable"], "false");
        assert_eq!(body["config"]["value.converter.schemas.enable"], "false");
    }

    #[tokio::test]
    async fn test_existing_connector_is_not_posted() {
        let client = MockConnectClient::new().with_existing("stations");

        let outcome = configure_connector(&client, &ConnectorConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome, ConnectorOutcome::AlreadyConfigured);
        assert_eq!(client.get_calls(), vec!["stations".to_string()]);
        assert!(client.posted().is_empty());
    }

    #[tokio::test]
    async fn test_missing_connector_is_created() {
        let client = MockConnectClient::new();

        let outcome = configure_connector(&client, &ConnectorConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome, ConnectorOutcome::Created);
        let posted = client.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].name, "stations");
    }

    #[tokio::test]
    async fn test_rejected_post_is_fatal() {
        let client = MockConnectClient::new().rejecting_with(409, "conflict");

        let err = configure_connector(&client, &ConnectorConfig::default())
            .await
            .unwrap_err();

        match err {
            Error::Connector { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "conflict");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
