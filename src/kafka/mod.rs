pub mod delivery;
pub mod producer;
pub mod serializer;
pub mod sink;
pub mod topic_manager;


pub use delivery::{DeliveryReport, DeliveryReports, DeliveryStatus};
pub use producer::{
    time_millis, DrainOutcome, ProducerContext, ProducerState, StreamProducer, StreamSpec,
};
pub use serializer::{frame, unframe, AvroEncoder, SerializationContext, MAGIC_BYTE};
pub use sink::{KafkaSink, KafkaSinkFactory, OutboundRecord, RecordSink, SinkFactory};
pub use topic_manager::{
    CreateTopicResult, KafkaTopicAdmin, ProvisionOutcome, TopicAdmin, TopicProvisioner,
};
