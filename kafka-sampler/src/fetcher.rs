use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::filter::MessageFilter;
use crate::kafka::{ClusterClient, KafkaClientError};
use crate::metrics;
use crate::progress::ProgressReporter;
use crate::types::PartitionConsumeRequest;

/// How a single partition's fetch ended.
#[derive(Debug)]
pub enum PartitionOutcome {
    /// The plan's offset range or message cap was reached.
    Completed { partition_id: i32, delivered: i64 },
    Cancelled { partition_id: i32, delivered: i64 },
    /// The partition failed. Its siblings are unaffected.
    Failed {
        partition_id: i32,
        delivered: i64,
        error: KafkaClientError,
    },
}

impl PartitionOutcome {
    pub fn partition_id(&self) -> i32 {
        match self {
            PartitionOutcome::Completed { partition_id, .. }
            | PartitionOutcome::Cancelled { partition_id, .. }
            | PartitionOutcome::Failed { partition_id, .. } => *partition_id,
        }
    }

    pub fn delivered(&self) -> i64 {
        match self {
            PartitionOutcome::Completed { delivered, .. }
            | PartitionOutcome::Cancelled { delivered, .. }
            | PartitionOutcome::Failed { delivered, .. } => *delivered,
        }
    }
}

/// Runs one partition's [`PartitionConsumeRequest`] against the cluster and
/// pushes what it reads into the shared reporter.
#[derive(Clone)]
pub struct PartitionFetchExecutor {
    client: Arc<dyn ClusterClient>,
    topic: Arc<str>,
    filter: Option<Arc<MessageFilter>>,
    reporter: Arc<ProgressReporter>,
}

impl PartitionFetchExecutor {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        topic: Arc<str>,
        filter: Option<Arc<MessageFilter>>,
        reporter: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            client,
            topic,
            filter,
            reporter,
        }
    }

    /// Streams the offsets `[start_offset, end_offset]` of the partition
    /// (unbounded for live tail) and stops once `max_message_count` messages
    /// were delivered, the range is exhausted, the fetch fails or `cancel`
    /// fires.
    ///
    /// Every record read counts towards the consumed stats. With a filter,
    /// only matching records are delivered and count towards the cap.
    /// Offsets are delivered at most once and in increasing order.
    pub async fn execute(
        &self,
        request: PartitionConsumeRequest,
        cancel: CancellationToken,
    ) -> PartitionOutcome {
        let partition_id = request.partition_id;
        let live_tail = request.is_live_tail();
        let mut delivered: i64 = 0;

        if request.max_message_count <= 0 {
            return PartitionOutcome::Completed {
                partition_id,
                delivered,
            };
        }

        let fetch = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PartitionOutcome::Cancelled { partition_id, delivered },
            fetch = self.client.fetch_messages(&self.topic, &request) => fetch,
        };
        let mut messages = match fetch {
            Ok(messages) => messages,
            Err(error) => return self.failed(partition_id, delivered, error),
        };

        let mut last_offset: Option<i64> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PartitionOutcome::Cancelled { partition_id, delivered },
                next = messages.next() => next,
            };

            let message = match next {
                None => break,
                Some(Ok(message)) => message,
                Some(Err(error)) => return self.failed(partition_id, delivered, error),
            };

            if !live_tail && message.offset > request.end_offset {
                break;
            }
            if !live_tail && message.offset < request.start_offset {
                continue;
            }
            if last_offset.is_some_and(|last| message.offset <= last) {
                continue;
            }
            last_offset = Some(message.offset);

            self.reporter.on_message_consumed(message.size);
            let reached_end = !live_tail && message.offset >= request.end_offset;

            let matches = self.filter.as_ref().map_or(true, |f| f.matches(&message));
            if matches {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return PartitionOutcome::Cancelled { partition_id, delivered },
                    _ = self.reporter.on_message(message) => {}
                }
                delivered += 1;
                if delivered >= request.max_message_count {
                    break;
                }
            }

            if reached_end {
                break;
            }
        }

        debug!(
            topic = %self.topic,
            partition = partition_id,
            delivered,
            "Partition fetch completed"
        );
        PartitionOutcome::Completed {
            partition_id,
            delivered,
        }
    }

    fn failed(
        &self,
        partition_id: i32,
        delivered: i64,
        error: KafkaClientError,
    ) -> PartitionOutcome {
        warn!(
            topic = %self.topic,
            partition = partition_id,
            error_type = error.error_type(),
            error = %error,
            "Partition fetch failed"
        );
        metrics::partition_error(error.error_type());
        PartitionOutcome::Failed {
            partition_id,
            delivered,
            error,
        }
    }
}
