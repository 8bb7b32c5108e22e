pub mod config;
pub mod connector;
pub mod error;
pub mod schema_registry;
pub mod testing;

pub mod kafka;

pub use config::Config;
pub use error::{Error, Result};
pub use kafka::{ProducerContext, StreamProducer, StreamSpec};
