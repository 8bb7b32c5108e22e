//! Error types and result handling for stream-producer.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use stream_producer::{Error, Result};
//!
//! fn bind_schemas() -> Result<()> {
//!     // Simulating an unreachable schema registry
//!     Err(Error::Binding("registry unreachable".to_string()))
//! }
//!
//! match bind_schemas() {
//!     Ok(()) => println!("Bound"),
//!     Err(Error::Binding(msg)) => eprintln!("Binding error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for stream-producer operations.
///
/// Provisioning failures, delivery failures and drain timeouts are not
/// represented here unless a caller opts into failing on them; they are
/// reported through [`crate::kafka::ProvisionOutcome`],
/// [`crate::kafka::DeliveryReport`] and [`crate::kafka::DrainOutcome`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from invalid values.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure while loading layered configuration sources.
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding unstructured payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Avro encoding error for a record that does not match its schema.
    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    /// HTTP transport error talking to the schema registry or Kafka Connect.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error, typically from reading schema files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema registry unreachable or schema malformed.
    ///
    /// Fatal to producer construction.
    #[error("Schema binding error: {0}")]
    Binding(String),

    /// Topic could not be provisioned and the producer was configured to
    /// fail fast on that.
    #[error("Provisioning error for topic '{topic}': {message}")]
    Provisioning {
        /// Topic that failed to provision
        topic: String,
        /// Broker-reported reason
        message: String,
    },

    /// Kafka Connect rejected the connector configuration.
    #[error("Connector configuration error ({status}): {body}")]
    Connector {
        /// HTTP status code returned by the control plane
        status: u16,
        /// Response body, if any
        body: String,
    },

    /// Operation not allowed in the producer's current lifecycle state.
    #[error("Invalid producer state: {message}")]
    InvalidState {
        /// Description of the rejected transition
        message: String,
    },

    /// Invalid or malformed wire envelope.
    #[error("Invalid message format: {message}")]
    InvalidMessage {
        /// Description of what was invalid
        message: String,
    },
}

/// A convenient Result type alias for stream-producer operations.
///
/// This is equivalent to `std::result::Result<T, stream_producer::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
