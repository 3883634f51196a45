//! Fan-in of lifecycle events from concurrent partition tasks onto a single
//! outbound connection.
//!
//! Producers push [`StreamEvent`]s into a bounded channel through a shared
//! [`ProgressReporter`]. One writer task ([`run_writer`]) drains the channel
//! and is the only code that ever touches the transport, so frames can never
//! interleave. The writer stops after the first terminal event.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::message::TopicMessage;
use crate::types::StreamEvent;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("client connection closed")]
    Closed,
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Io(String),
}

/// The outbound side of a client connection.
#[async_trait]
pub trait EventTransport: Send {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError>;

    /// Called once after the last event.
    async fn close(&mut self) {}

    /// Resolves once the client is known to be gone. Transports that only
    /// find out on a failed send never resolve.
    async fn closed(&mut self) {
        futures::future::pending::<()>().await
    }
}

/// Concurrency-safe sink for one request's lifecycle events.
pub struct ProgressReporter {
    sender: Sender<StreamEvent>,
    emit_progress: bool,
    progress_interval: Duration,
    messages_consumed: AtomicI64,
    bytes_consumed: AtomicI64,
    finished: AtomicBool,
}

impl ProgressReporter {
    /// Creates a reporter and the receiving end its writer drains.
    ///
    /// `emit_progress` turns on periodic progress updates. Only filtered
    /// requests need them: otherwise every consumed message is already
    /// streamed to the client.
    pub fn channel(
        capacity: usize,
        emit_progress: bool,
        progress_interval: Duration,
    ) -> (Arc<Self>, Receiver<StreamEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let reporter = Self {
            sender,
            emit_progress,
            progress_interval,
            messages_consumed: AtomicI64::new(0),
            bytes_consumed: AtomicI64::new(0),
            finished: AtomicBool::new(false),
        };
        (Arc::new(reporter), receiver)
    }

    pub async fn on_phase(&self, phase: &str) {
        self.send(StreamEvent::Phase {
            phase: phase.to_string(),
        })
        .await;
    }

    pub async fn on_message(&self, message: TopicMessage) {
        self.send(StreamEvent::Message {
            message: Box::new(message),
        })
        .await;
    }

    /// Stats only: counts a record read from the log, whether or not it is
    /// delivered to the client.
    pub fn on_message_consumed(&self, size_bytes: usize) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
        self.bytes_consumed
            .fetch_add(i64::try_from(size_bytes).unwrap_or(i64::MAX), Ordering::Relaxed);
    }

    pub async fn on_partition_error(&self, partition_id: i32, message: String) {
        self.send(StreamEvent::PartitionError {
            partition_id,
            message,
        })
        .await;
    }

    pub async fn on_complete(&self, elapsed: Duration, is_cancelled: bool) {
        let (messages_consumed, bytes_consumed) = self.totals();
        self.finish(StreamEvent::Done {
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            is_cancelled,
            messages_consumed,
            bytes_consumed,
        })
        .await;
    }

    pub async fn on_error(&self, message: String) {
        self.finish(StreamEvent::Error { message }).await;
    }

    pub fn totals(&self) -> (i64, i64) {
        (
            self.messages_consumed.load(Ordering::Relaxed),
            self.bytes_consumed.load(Ordering::Relaxed),
        )
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Starts the periodic progress task, if this reporter emits progress.
    /// The task ends when `cancel` fires or the request finishes.
    pub fn start_progress_ticker(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !self.emit_progress {
            return None;
        }

        let reporter = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reporter.progress_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if reporter.is_finished() {
                    break;
                }

                let (messages_consumed, bytes_consumed) = reporter.totals();
                let event = StreamEvent::ProgressUpdate {
                    messages_consumed,
                    bytes_consumed,
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = reporter.sender.send(event) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Progress ticker stopped");
        }))
    }

    async fn send(&self, event: StreamEvent) {
        if self.is_finished() {
            return;
        }
        // The writer is gone once the client disconnects. Nothing left to
        // tell it.
        if self.sender.send(event).await.is_err() {
            debug!("Event writer is gone, dropping event");
        }
    }

    async fn finish(&self, event: StreamEvent) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.sender.send(event).await.is_err() {
            debug!("Event writer is gone, dropping terminal event");
        }
    }
}

/// How the writer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// A terminal event was delivered.
    Terminal,
    /// The transport failed. The request was cancelled.
    Disconnected,
    /// All reporters went away without a terminal event.
    Abandoned,
}

/// Forwards events to the transport in channel order until a terminal event
/// has been written. A failed send, or the transport reporting itself
/// closed while the request is idle, means the client is gone and cancels
/// the request through `cancel`.
pub async fn run_writer<T: EventTransport>(
    mut events: Receiver<StreamEvent>,
    mut transport: T,
    cancel: CancellationToken,
) -> WriterExit {
    let mut exit = WriterExit::Abandoned;

    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = transport.closed() => {
                debug!("Client went away, cancelling request");
                cancel.cancel();
                exit = WriterExit::Disconnected;
                break;
            }
        };
        let terminal = event.is_terminal();

        if let Err(e) = transport.send(&event).await {
            debug!(error = %e, "Client transport failed, cancelling request");
            cancel.cancel();
            exit = WriterExit::Disconnected;
            break;
        }

        if terminal {
            exit = WriterExit::Terminal;
            break;
        }
    }

    // Unblock producers still waiting on a full channel.
    events.close();
    transport.close().await;
    exit
}

/// Transport that forwards events into a channel.
pub struct ChannelTransport {
    sender: Sender<StreamEvent>,
}

impl ChannelTransport {
    pub fn new(sender: Sender<StreamEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn closed(&mut self) {
        self.sender.closed().await
    }
}
