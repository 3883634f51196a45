#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use futures::StreamExt;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use kafka_sampler::config::ListMessagesSettings;
use kafka_sampler::kafka::{ClusterClient, KafkaClientError, MessageStream};
use kafka_sampler::message::TopicMessage;
use kafka_sampler::orchestrator::RequestState;
use kafka_sampler::progress::ChannelTransport;
use kafka_sampler::types::{
    ListMessageRequest, PartitionConsumeRequest, PartitionSelection, StartOffset, StreamEvent,
    Watermark, PHASE_CONSUMING,
};
use kafka_sampler::{create_router, AppState, ListMessagesService};

/// One in-memory partition. Offsets `low..high` hold records whose value is
/// produced by the owning topic's value function.
#[derive(Clone)]
pub struct MockPartition {
    pub id: i32,
    pub low: i64,
    pub high: i64,
    /// Fail the fetch after this many records.
    pub fail_after: Option<usize>,
    /// Records that "arrive" once a live-tail fetch starts.
    pub live: Vec<String>,
}

impl MockPartition {
    pub fn new(id: i32, low: i64, high: i64) -> Self {
        Self {
            id,
            low,
            high,
            fail_after: None,
            live: Vec::new(),
        }
    }

    pub fn fail_after(mut self, records: usize) -> Self {
        self.fail_after = Some(records);
        self
    }

    pub fn with_live(mut self, values: &[&str]) -> Self {
        self.live = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// Default record value: `p<partition>-<offset>`.
pub fn default_value(partition: i32, offset: i64) -> String {
    format!("p{partition}-{offset}")
}

pub struct MockCluster {
    topics: HashMap<String, Vec<MockPartition>>,
    value_fn: fn(i32, i64) -> String,
    fail_watermarks: bool,
    healthy: bool,
    calls: AtomicUsize,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self {
            topics: HashMap::new(),
            value_fn: default_value,
            fail_watermarks: false,
            healthy: true,
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, name: &str, partitions: Vec<MockPartition>) -> Self {
        self.topics.insert(name.to_string(), partitions);
        self
    }

    pub fn with_values(mut self, value_fn: fn(i32, i64) -> String) -> Self {
        self.value_fn = value_fn;
        self
    }

    pub fn failing_watermarks(mut self) -> Self {
        self.fail_watermarks = true;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Number of cluster calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn partitions(&self, topic: &str) -> Result<&Vec<MockPartition>, KafkaClientError> {
        self.topics
            .get(topic)
            .ok_or_else(|| KafkaClientError::TopicNotFound(topic.to_string()))
    }

    fn record(&self, partition: i32, offset: i64, value: &str) -> TopicMessage {
        TopicMessage::new(
            partition,
            offset,
            Some(1_700_000_000_000 + offset),
            Some(format!("key-{offset}").as_bytes()),
            Some(value.as_bytes()),
            vec![("source".to_string(), Some(b"mock".to_vec()))],
        )
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn partition_ids(&self, topic: &str) -> Result<Vec<i32>, KafkaClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut ids: Vec<i32> = self.partitions(topic)?.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn watermarks(
        &self,
        topic: &str,
        partitions: &[i32],
    ) -> Result<BTreeMap<i32, Watermark>, KafkaClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_watermarks {
            return Err(KafkaClientError::Partition {
                operation: "fetch_watermarks",
                partition: partitions.first().copied().unwrap_or_default(),
                source: KafkaError::MetadataFetch(RDKafkaErrorCode::BrokerTransportFailure),
            });
        }

        Ok(self
            .partitions(topic)?
            .iter()
            .filter(|p| partitions.contains(&p.id))
            .map(|p| (p.id, Watermark::new(p.id, p.low, p.high)))
            .collect())
    }

    async fn fetch_messages(
        &self,
        topic: &str,
        request: &PartitionConsumeRequest,
    ) -> Result<MessageStream, KafkaClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let partition = self
            .partitions(topic)?
            .iter()
            .find(|p| p.id == request.partition_id)
            .cloned()
            .ok_or_else(|| KafkaClientError::TopicNotFound(topic.to_string()))?;

        let mut records: Vec<Result<TopicMessage, KafkaClientError>> = if request.is_live_tail() {
            partition
                .live
                .iter()
                .enumerate()
                .map(|(i, value)| Ok(self.record(partition.id, partition.high + i as i64, value)))
                .collect()
        } else {
            // Like a real broker, the read runs to the end of the log and
            // ignores the planned end offset.
            (request.start_offset.max(partition.low)..partition.high)
                .map(|offset| {
                    let value = (self.value_fn)(partition.id, offset);
                    Ok(self.record(partition.id, offset, &value))
                })
                .collect()
        };

        if let Some(n) = partition.fail_after {
            records.truncate(n);
            records.push(Err(KafkaClientError::Partition {
                operation: "fetch",
                partition: partition.id,
                source: KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure),
            }));
        }

        let stream = futures::stream::iter(records);
        if request.is_live_tail() {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }

    async fn health_check(&self) -> Result<(), KafkaClientError> {
        if self.healthy {
            Ok(())
        } else {
            Err(KafkaClientError::Topic {
                operation: "health_check",
                topic: String::new(),
                source: KafkaError::MetadataFetch(RDKafkaErrorCode::AllBrokersDown),
            })
        }
    }
}

pub fn test_settings() -> ListMessagesSettings {
    ListMessagesSettings {
        timeout: Duration::from_secs(5),
        max_message_count: 500,
        event_channel_capacity: 16,
        progress_interval: Duration::from_millis(20),
    }
}

pub fn request(topic: &str, start_offset: StartOffset, message_count: u16) -> ListMessageRequest {
    ListMessageRequest {
        topic_name: topic.to_string(),
        partition_id: PartitionSelection::All,
        start_offset,
        message_count,
        filter_expression: None,
    }
}

/// Runs one request through the service and collects every event the client
/// would have seen.
pub async fn collect_events(
    service: &ListMessagesService,
    request: ListMessageRequest,
    cancel: CancellationToken,
) -> (RequestState, Vec<StreamEvent>) {
    let (sender, mut receiver) = mpsc::channel(1024);
    let state = service
        .stream_messages(request, ChannelTransport::new(sender), cancel)
        .await;

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    (state, events)
}

pub async fn run(
    cluster: Arc<MockCluster>,
    settings: ListMessagesSettings,
    request: ListMessageRequest,
) -> (RequestState, Vec<StreamEvent>) {
    let service = ListMessagesService::new(cluster, settings);
    collect_events(&service, request, CancellationToken::new()).await
}

/// Exactly one terminal event, and it comes last. No message before the
/// consuming phase.
pub fn assert_well_formed(events: &[StreamEvent]) {
    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1, "expected one terminal event: {events:?}");
    assert!(events.last().is_some_and(StreamEvent::is_terminal));

    let consuming = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Phase { phase } if phase == PHASE_CONSUMING));
    let first_message = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Message { .. }));
    if let Some(first_message) = first_message {
        assert!(consuming.is_some_and(|c| c < first_message));
    }
}

pub fn phases(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Phase { phase } => Some(phase.clone()),
            _ => None,
        })
        .collect()
}

pub fn messages(events: &[StreamEvent]) -> Vec<&TopicMessage> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Message { message } => Some(message.as_ref()),
            _ => None,
        })
        .collect()
}

/// Delivered offsets per partition, in delivery order.
pub fn offsets_by_partition(events: &[StreamEvent]) -> BTreeMap<i32, Vec<i64>> {
    let mut offsets: BTreeMap<i32, Vec<i64>> = BTreeMap::new();
    for message in messages(events) {
        offsets
            .entry(message.partition_id)
            .or_default()
            .push(message.offset);
    }
    offsets
}

pub struct TestHarness {
    pub cluster: Arc<MockCluster>,
    app: Router,
}

impl TestHarness {
    pub fn new(cluster: MockCluster) -> Self {
        let cluster = Arc::new(cluster);
        let state = AppState {
            service: ListMessagesService::new(cluster.clone(), test_settings()),
            event_buffer: 64,
            version: "test".to_string(),
        };

        Self {
            cluster,
            app: create_router(state),
        }
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn post(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn body_string(response: Response<Body>) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        serde_json::from_str(&Self::body_string(response).await).unwrap()
    }

    /// The JSON payloads of every SSE `data:` line in the body.
    pub async fn sse_events(response: Response<Body>) -> Vec<serde_json::Value> {
        Self::body_string(response)
            .await
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim()).unwrap())
            .collect()
    }
}
