use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use common_kafka::kafka_consumer::{create_metadata_consumer, create_partition_consumer};
use futures::future::join_all;
use futures::StreamExt;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, warn};

use crate::kafka::{ClusterClient, KafkaClientError, MessageStream};
use crate::message::TopicMessage;
use crate::types::{PartitionConsumeRequest, Watermark};

/// [`ClusterClient`] backed by librdkafka.
///
/// Metadata and watermark lookups share one long-lived `BaseConsumer`; the
/// calls block, so they run on the blocking pool. Every partition fetch gets
/// its own `StreamConsumer`, manually assigned without subscribing and
/// dropped with the returned stream.
#[derive(Clone)]
pub struct RdKafkaClient {
    config: KafkaConfig,
    metadata_consumer: Arc<BaseConsumer>,
}

impl RdKafkaClient {
    pub fn new(config: KafkaConfig) -> Result<Self, KafkaClientError> {
        let metadata_consumer =
            create_metadata_consumer(&config).map_err(KafkaClientError::ClientCreation)?;
        Ok(Self {
            config,
            metadata_consumer: Arc::new(metadata_consumer),
        })
    }
}

#[async_trait]
impl ClusterClient for RdKafkaClient {
    async fn partition_ids(&self, topic: &str) -> Result<Vec<i32>, KafkaClientError> {
        let consumer = self.metadata_consumer.clone();
        let timeout = self.config.metadata_timeout();
        let topic = topic.to_string();

        tokio::task::spawn_blocking(move || {
            let metadata = consumer
                .fetch_metadata(Some(&topic), timeout)
                .map_err(|source| KafkaClientError::Topic {
                    operation: "fetch_metadata",
                    topic: topic.clone(),
                    source,
                })?;

            let topic_metadata = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| KafkaClientError::TopicNotFound(topic.clone()))?;

            if let Some(err) = topic_metadata.error() {
                let code = RDKafkaErrorCode::from(err);
                if code == RDKafkaErrorCode::UnknownTopicOrPartition {
                    return Err(KafkaClientError::TopicNotFound(topic));
                }
                return Err(KafkaClientError::Topic {
                    operation: "fetch_metadata",
                    topic,
                    source: KafkaError::MetadataFetch(code),
                });
            }

            let mut ids: Vec<i32> = topic_metadata.partitions().iter().map(|p| p.id()).collect();
            ids.sort_unstable();
            debug!(topic = %topic, partitions = ids.len(), "Fetched partition ids");
            Ok(ids)
        })
        .await?
    }

    async fn watermarks(
        &self,
        topic: &str,
        partitions: &[i32],
    ) -> Result<BTreeMap<i32, Watermark>, KafkaClientError> {
        let timeout = self.config.metadata_timeout();

        // one list-offsets round trip per partition, run concurrently
        let lookups = partitions.iter().map(|&partition| {
            let consumer = self.metadata_consumer.clone();
            let topic = topic.to_string();
            tokio::task::spawn_blocking(move || {
                consumer
                    .fetch_watermarks(&topic, partition, timeout)
                    .map_err(|source| KafkaClientError::Partition {
                        operation: "fetch_watermarks",
                        partition,
                        source,
                    })
                    .and_then(|(low, high)| {
                        if low > high {
                            return Err(KafkaClientError::InvalidWatermarks {
                                partition,
                                low,
                                high,
                            });
                        }
                        Ok(Watermark::new(partition, low, high))
                    })
            })
        });

        let mut marks = BTreeMap::new();
        for result in join_all(lookups).await {
            let mark = result??;
            marks.insert(mark.partition_id, mark);
        }
        Ok(marks)
    }

    async fn fetch_messages(
        &self,
        topic: &str,
        request: &PartitionConsumeRequest,
    ) -> Result<MessageStream, KafkaClientError> {
        let partition = request.partition_id;
        let live_tail = request.is_live_tail();

        let consumer =
            create_partition_consumer(&self.config).map_err(KafkaClientError::ClientCreation)?;

        let start = if live_tail {
            Offset::End
        } else {
            Offset::Offset(request.start_offset)
        };
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, start)
            .map_err(|source| KafkaClientError::Partition {
                operation: "assign",
                partition,
                source,
            })?;
        consumer
            .assign(&tpl)
            .map_err(|source| KafkaClientError::Partition {
                operation: "assign",
                partition,
                source,
            })?;

        debug!(topic, partition, start = ?start, "Assigned partition consumer");

        let stream = futures::stream::unfold(Some(consumer), move |state| async move {
            let consumer = state?;
            loop {
                let next = match consumer.recv().await {
                    Ok(message) => Ok(to_topic_message(&message)),
                    Err(e) => Err(e),
                };

                match next {
                    Ok(message) => return Some((Ok(message), Some(consumer))),
                    // A bounded read has nothing left once it hits the end
                    // of the partition. Live tail keeps waiting.
                    Err(KafkaError::PartitionEOF(_)) if live_tail => continue,
                    Err(KafkaError::PartitionEOF(_)) => return None,
                    Err(source) => {
                        warn!(partition, error = %source, "Partition fetch failed");
                        let error = KafkaClientError::Partition {
                            operation: "fetch",
                            partition,
                            source,
                        };
                        return Some((Err(error), None));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn health_check(&self) -> Result<(), KafkaClientError> {
        let consumer = self.metadata_consumer.clone();
        let timeout = self.config.metadata_timeout();

        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, timeout)
                .map(|_| ())
                .map_err(|source| KafkaClientError::Topic {
                    operation: "health_check",
                    topic: String::new(),
                    source,
                })
        })
        .await?
    }
}

fn to_topic_message(message: &BorrowedMessage<'_>) -> TopicMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec)))
                .collect()
        })
        .unwrap_or_default();

    TopicMessage::new(
        message.partition(),
        message.offset(),
        message.timestamp().to_millis(),
        message.key(),
        message.payload(),
        headers,
    )
}
