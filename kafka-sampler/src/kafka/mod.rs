use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;

use crate::message::TopicMessage;
use crate::types::{PartitionConsumeRequest, Watermark};

pub mod client;

pub use client::RdKafkaClient;

pub type MessageStream = BoxStream<'static, Result<TopicMessage, KafkaClientError>>;

#[derive(Error, Debug)]
pub enum KafkaClientError {
    #[error("failed to create kafka client: {0}")]
    ClientCreation(#[source] KafkaError),

    #[error("topic '{0}' does not exist")]
    TopicNotFound(String),

    #[error("kafka error during {operation} for topic {topic}: {source}")]
    Topic {
        operation: &'static str,
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("kafka error during {operation} for partition {partition}: {source}")]
    Partition {
        operation: &'static str,
        partition: i32,
        #[source]
        source: KafkaError,
    },

    #[error("broker returned invalid watermarks for partition {partition}: low {low} > high {high}")]
    InvalidWatermarks { partition: i32, low: i64, high: i64 },

    #[error("kafka call did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl KafkaClientError {
    /// Returns the error type tag for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            KafkaClientError::ClientCreation(_) => "client_creation",
            KafkaClientError::TopicNotFound(_) => "topic_not_found",
            KafkaClientError::Topic { source, .. } | KafkaClientError::Partition { source, .. }
                if is_timeout_error(source) =>
            {
                "timeout"
            }
            KafkaClientError::Topic { .. } | KafkaClientError::Partition { .. } => "kafka_error",
            KafkaClientError::InvalidWatermarks { .. } => "invalid_watermarks",
            KafkaClientError::Join(_) => "join",
        }
    }
}

/// Check if a KafkaError represents a timeout condition
pub fn is_timeout_error(e: &KafkaError) -> bool {
    match e {
        KafkaError::Global(code)
        | KafkaError::MessageConsumption(code)
        | KafkaError::MetadataFetch(code) => {
            matches!(
                code,
                RDKafkaErrorCode::RequestTimedOut | RDKafkaErrorCode::OperationTimedOut
            )
        }
        _ => false,
    }
}

/// The narrow slice of the cluster the sampler needs. Connection handling,
/// retries and the wire protocol all live behind it.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Partition ids of `topic`, in ascending order.
    async fn partition_ids(&self, topic: &str) -> Result<Vec<i32>, KafkaClientError>;

    /// Low and high watermark of every requested partition, keyed by id.
    async fn watermarks(
        &self,
        topic: &str,
        partitions: &[i32],
    ) -> Result<BTreeMap<i32, Watermark>, KafkaClientError>;

    /// Reads `request.partition_id` from `request.start_offset` onwards, or
    /// from the current end for live tail. Records come in offset order. A
    /// bounded read stops at the end of the partition. Dropping the stream
    /// stops the fetch.
    async fn fetch_messages(
        &self,
        topic: &str,
        request: &PartitionConsumeRequest,
    ) -> Result<MessageStream, KafkaClientError>;

    async fn health_check(&self) -> Result<(), KafkaClientError>;
}
