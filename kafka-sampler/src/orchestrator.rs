//! Drives one list-messages request from validation to its terminal event.
//!
//! ```text
//! Init -> ResolvingPartitions -> ResolvingWatermarks -> Planning -> Consuming -> Completed
//!              |                        |                               \-> Cancelled
//!              \------------------------+--> Failed
//! ```
//!
//! Every path ends with exactly one terminal event: `Done` for completed and
//! cancelled requests, `Error` for failed ones.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::ListMessagesSettings;
use crate::error::RequestError;
use crate::fetcher::{PartitionFetchExecutor, PartitionOutcome};
use crate::filter::MessageFilter;
use crate::kafka::{ClusterClient, KafkaClientError};
use crate::metrics;
use crate::planner;
use crate::progress::{run_writer, EventTransport, ProgressReporter, WriterExit};
use crate::types::{
    ListMessageRequest, PartitionConsumeRequest, PartitionSelection, Watermark,
    PHASE_CONSUMING, PHASE_GET_PARTITIONS, PHASE_GET_WATERMARKS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Init,
    ResolvingPartitions,
    ResolvingWatermarks,
    Planning,
    Consuming,
    Completed,
    Cancelled,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Failed
        )
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestState::Init => "init",
            RequestState::ResolvingPartitions => "resolving_partitions",
            RequestState::ResolvingWatermarks => "resolving_watermarks",
            RequestState::Planning => "planning",
            RequestState::Consuming => "consuming",
            RequestState::Completed => "completed",
            RequestState::Cancelled => "cancelled",
            RequestState::Failed => "failed",
        }
    }
}

/// Why a request stopped before consuming.
enum Abort {
    Cancelled,
    Failed(String),
}

impl From<KafkaClientError> for Abort {
    fn from(e: KafkaClientError) -> Self {
        Abort::Failed(e.to_string())
    }
}

impl From<RequestError> for Abort {
    fn from(e: RequestError) -> Self {
        Abort::Failed(e.to_string())
    }
}

#[derive(Clone)]
pub struct ListMessagesService {
    client: Arc<dyn ClusterClient>,
    settings: ListMessagesSettings,
}

impl ListMessagesService {
    pub fn new(client: Arc<dyn ClusterClient>, settings: ListMessagesSettings) -> Self {
        Self { client, settings }
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// Checks everything that can be checked without talking to the
    /// cluster, and compiles the filter if there is one.
    pub fn validate(
        &self,
        request: &ListMessageRequest,
    ) -> Result<Option<MessageFilter>, RequestError> {
        if request.topic_name.trim().is_empty() {
            return Err(RequestError::MissingTopic);
        }

        let max = self.settings.max_message_count;
        if request.message_count == 0 || request.message_count > max {
            return Err(RequestError::MessageCountOutOfRange {
                requested: request.message_count,
                max,
            });
        }

        request
            .filter()
            .map(MessageFilter::parse)
            .transpose()
            .map_err(RequestError::from)
    }

    /// Runs `request` and writes its events to `transport` until the
    /// terminal event has been delivered. Cancelling `cancel`, or the
    /// transport failing, stops the request.
    pub async fn stream_messages<T>(
        &self,
        request: ListMessageRequest,
        transport: T,
        cancel: CancellationToken,
    ) -> RequestState
    where
        T: EventTransport + 'static,
    {
        let (reporter, events) = ProgressReporter::channel(
            self.settings.event_channel_capacity,
            request.filter().is_some(),
            self.settings.progress_interval,
        );
        let writer = tokio::spawn(run_writer(events, transport, cancel.clone()));

        let state = self.list_messages(request, reporter, cancel).await;

        match writer.await {
            Ok(WriterExit::Terminal) => {}
            Ok(exit) => info!(state = state.as_str(), exit = ?exit, "Client went away before the terminal event"),
            Err(e) => warn!(error = %e, "Event writer task failed"),
        }
        state
    }

    /// Runs `request`, reporting every lifecycle event into `reporter`, and
    /// returns the terminal state.
    pub async fn list_messages(
        &self,
        request: ListMessageRequest,
        reporter: Arc<ProgressReporter>,
        cancel: CancellationToken,
    ) -> RequestState {
        let span = tracing::info_span!(
            "list_messages",
            topic = %request.topic_name,
            partition = ?request.partition_id,
            start_offset = ?request.start_offset,
            message_count = request.message_count,
            filtered = request.filter().is_some(),
        );

        async move {
            let started = Instant::now();
            // The deadline cancels a child token, so the caller's token is
            // left alone.
            let token = cancel.child_token();
            let deadline = {
                let token = token.clone();
                let timeout = self.settings.timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    token.cancel();
                })
            };

            let state = self.run(&request, &reporter, &token, started).await;
            deadline.abort();

            let (messages, bytes) = reporter.totals();
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics::request_finished(state.as_str(), elapsed_ms, messages, bytes);
            info!(
                state = state.as_str(),
                elapsed_ms,
                messages_consumed = messages,
                bytes_consumed = bytes,
                "List messages request finished"
            );
            state
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &ListMessageRequest,
        reporter: &Arc<ProgressReporter>,
        token: &CancellationToken,
        started: Instant,
    ) -> RequestState {
        enter(RequestState::Init);
        let prepared = match self.prepare(request, reporter, token).await {
            Ok(prepared) => prepared,
            Err(Abort::Cancelled) => {
                reporter.on_complete(started.elapsed(), true).await;
                return enter(RequestState::Cancelled);
            }
            Err(Abort::Failed(message)) => {
                warn!(error = %message, "List messages request failed");
                reporter.on_error(message).await;
                return enter(RequestState::Failed);
            }
        };

        let is_cancelled = self.consume(request, prepared, reporter, token).await;
        reporter.on_complete(started.elapsed(), is_cancelled).await;

        if is_cancelled {
            enter(RequestState::Cancelled)
        } else {
            enter(RequestState::Completed)
        }
    }

    /// Everything before the first fetch: validation, partition and
    /// watermark resolution, planning.
    async fn prepare(
        &self,
        request: &ListMessageRequest,
        reporter: &ProgressReporter,
        token: &CancellationToken,
    ) -> Result<Prepared, Abort> {
        let filter = self.validate(request)?;
        let topic = request.topic_name.as_str();

        enter(RequestState::ResolvingPartitions);
        reporter.on_phase(PHASE_GET_PARTITIONS).await;
        let partition_ids = tokio::select! {
            _ = token.cancelled() => return Err(Abort::Cancelled),
            ids = self.client.partition_ids(topic) => ids?,
        };
        let partition_ids = select_partitions(topic, request.partition_id, partition_ids)?;

        enter(RequestState::ResolvingWatermarks);
        reporter.on_phase(PHASE_GET_WATERMARKS).await;
        let watermarks: BTreeMap<i32, Watermark> = tokio::select! {
            _ = token.cancelled() => return Err(Abort::Cancelled),
            marks = self.client.watermarks(topic, &partition_ids) => marks?,
        };

        enter(RequestState::Planning);
        let plan = planner::plan(
            request.start_offset,
            i64::from(request.message_count),
            filter.is_some(),
            &watermarks,
        );
        debug!(
            planned_partitions = plan.len(),
            planned_messages = plan.values().map(|r| r.max_message_count).sum::<i64>(),
            "Consume requests calculated"
        );

        Ok(Prepared {
            plan,
            filter: filter.map(Arc::new),
        })
    }

    /// Fetches every planned partition concurrently. Returns whether the
    /// request was cut short by cancellation.
    async fn consume(
        &self,
        request: &ListMessageRequest,
        prepared: Prepared,
        reporter: &Arc<ProgressReporter>,
        token: &CancellationToken,
    ) -> bool {
        enter(RequestState::Consuming);
        reporter.on_phase(PHASE_CONSUMING).await;

        let ticker_token = token.child_token();
        let ticker = reporter.start_progress_ticker(ticker_token.clone());

        let executor = PartitionFetchExecutor::new(
            self.client.clone(),
            Arc::from(request.topic_name.as_str()),
            prepared.filter,
            reporter.clone(),
        );

        let tasks: Vec<_> = prepared
            .plan
            .into_values()
            .map(|partition_request| {
                let executor = executor.clone();
                let reporter = reporter.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    let outcome = executor.execute(partition_request, token).await;
                    if let PartitionOutcome::Failed {
                        partition_id,
                        error,
                        ..
                    } = &outcome
                    {
                        reporter
                            .on_partition_error(*partition_id, error.to_string())
                            .await;
                    }
                    outcome
                })
            })
            .collect();
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();

        let is_cancelled = tokio::select! {
            results = join_all(tasks) => {
                let mut cancelled = token.is_cancelled();
                for result in results {
                    match result {
                        Ok(outcome) => {
                            cancelled |= matches!(outcome, PartitionOutcome::Cancelled { .. });
                        }
                        Err(e) => warn!(error = %e, "Partition task failed"),
                    }
                }
                cancelled
            }
            _ = token.cancelled() => {
                // Executors watch the same token; make sure none outlives
                // the request.
                for abort in aborts {
                    abort.abort();
                }
                true
            }
        };

        ticker_token.cancel();
        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                warn!(error = %e, "Progress ticker failed");
            }
        }

        is_cancelled
    }
}

struct Prepared {
    plan: BTreeMap<i32, PartitionConsumeRequest>,
    filter: Option<Arc<MessageFilter>>,
}

fn enter(state: RequestState) -> RequestState {
    debug!(state = state.as_str(), "Request state changed");
    state
}

fn select_partitions(
    topic: &str,
    selection: PartitionSelection,
    available: Vec<i32>,
) -> Result<Vec<i32>, RequestError> {
    match selection {
        PartitionSelection::All => Ok(available),
        PartitionSelection::Single(partition) if available.contains(&partition) => {
            Ok(vec![partition])
        }
        PartitionSelection::Single(partition) => Err(RequestError::PartitionNotFound {
            topic: topic.to_string(),
            partition,
            partition_count: available.len(),
        }),
    }
}
