//! Schema registry access and schema binding.
//!
//! A stream's key schema (and optional value schema) is registered with a
//! Confluent-compatible schema registry under the `<topic>-key` and
//! `<topic>-value` subjects. The returned ids are baked into a
//! [`SerializationContext`] that frames every encoded record as
//! `0x00 | schema id (u32, big-endian) | avro datum`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stream_producer::config::SchemaRegistryConfig;
//! use stream_producer::schema_registry::{HttpSchemaRegistry, SchemaBinding};
//!
//! # async fn example() -> stream_producer::Result<()> {
//! let registry = HttpSchemaRegistry::new(&SchemaRegistryConfig::default())?;
//! let binding = SchemaBinding::new(Arc::new(registry));
//!
//! let context = binding.bind("stations", r#"{"type":"long"}"#, None).await?;
//! let key = context.encode_key(&42_i64)?;
//! assert_eq!(key[0], 0);
//! # Ok(())
//! # }
//! ```

use crate::config::SchemaRegistryConfig;
use crate::kafka::serializer::{AvroEncoder, SerializationContext};
use crate::{Error, Result};
use apache_avro::Schema;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Registry-assigned schema identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaId(pub u32);

impl std::fmt::Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subject a topic's key schema is registered under.
pub fn key_subject(topic: &str) -> String {
    format!("{}-key", topic)
}

/// Subject a topic's value schema is registered under.
pub fn value_subject(topic: &str) -> String {
    format!("{}-value", topic)
}

/// Registers schemas and hands back their ids.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Registers `schema` under `subject`, or returns the id it already has.
    ///
    /// `definition` is the schema text as declared. It is what the registry
    /// stores, so defaults, docs and logical types survive.
    async fn register(
        &self,
        subject: &str,
        schema: &Schema,
        definition: &str,
    ) -> Result<SchemaId>;
}

#[derive(Debug, Serialize)]
struct RegisterSchemaRequest<'a> {
    schema: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterSchemaResponse {
    id: u32,
}

/// Confluent-compatible registry over HTTP, caching ids per subject and
/// canonical form.
pub struct HttpSchemaRegistry {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    cache: Mutex<HashMap<(String, String), SchemaId>>,
}

impl HttpSchemaRegistry {
    pub fn new(config: &SchemaRegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Binding(format!("failed to build registry client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            cache: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    #[instrument(skip(self, schema, definition), fields(subject = %subject))]
    async fn register(
        &self,
        subject: &str,
        schema: &Schema,
        definition: &str,
    ) -> Result<SchemaId> {
        let cache_key = (subject.to_string(), schema.canonical_form());

        if let Some(id) = self.cache.lock().await.get(&cache_key) {
            debug!("Schema for subject '{}' already registered as {}", subject, id);
            return Ok(*id);
        }

        let url = format!("{}/subjects/{}/versions", self.base_url, subject);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/vnd.schemaregistry.v1+json")
            .json(&RegisterSchemaRequest { schema: definition });
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            Error::Binding(format!(
                "schema registry unreachable at {}: {}",
                self.base_url, e
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Binding(format!(
                "registry rejected schema for subject '{}' ({}): {}",
                subject, status, body
            )));
        }

        let registered: RegisterSchemaResponse = response.json().await.map_err(|e| {
            Error::Binding(format!("invalid registry response for '{}': {}", subject, e))
        })?;
        let id = SchemaId(registered.id);

        info!("Registered schema for subject '{}' with id {}", subject, id);
        self.cache.lock().await.insert(cache_key, id);
        Ok(id)
    }
}

/// Binds a stream's schemas to a serialization context.
#[derive(Clone)]
pub struct SchemaBinding {
    registry: Arc<dyn SchemaRegistry>,
}

impl SchemaBinding {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Parses and registers the key schema and, when given, the value schema.
    ///
    /// Every failure here is reported as [`Error::Binding`].
    pub async fn bind(
        &self,
        topic: &str,
        key_schema: &str,
        value_schema: Option<&str>,
    ) -> Result<SerializationContext> {
        let key = self.resolve(&key_subject(topic), key_schema).await?;

        let value = match value_schema {
            Some(definition) => Some(self.resolve(&value_subject(topic), definition).await?),
            None => {
                debug!("No value schema for '{}', values pass through unstructured", topic);
                None
            }
        };

        Ok(SerializationContext::new(key, value))
    }

    async fn resolve(&self, subject: &str, definition: &str) -> Result<AvroEncoder> {
        let schema = Schema::parse_str(definition)
            .map_err(|e| Error::Binding(format!("malformed schema for '{}': {}", subject, e)))?;

        let id = self
            .registry
            .register(subject, &schema, definition)
            .await
            .map_err(|e| match e {
                Error::Binding(_) => e,
                other => Error::Binding(other.to_string()),
            })?;

        Ok(AvroEncoder::new(schema, id))
    }
}
