use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{SplitSink, Stream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::error::AppError;
use crate::orchestrator::ListMessagesService;
use crate::progress::{ChannelTransport, EventTransport, TransportError};
use crate::types::{ListMessageRequest, StreamEvent};

const REQUEST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);
const SSE_KEEPALIVE: Duration = Duration::from_secs(15);

/// Upgrades to a WebSocket. The client sends one JSON list-messages request
/// as its first text frame and then receives one JSON event per frame.
/// Closing the socket cancels the request.
pub async fn list_messages_ws(
    ws: WebSocketUpgrade,
    Path(topic): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, topic))
}

async fn handle_socket(socket: WebSocket, state: AppState, topic: String) {
    let (sender, receiver) = socket.split();
    serve_socket(
        receiver,
        WebSocketTransport { sender },
        &state.service,
        &topic,
    )
    .await;
}

async fn serve_socket<R, T>(
    mut receiver: R,
    mut transport: T,
    service: &ListMessagesService,
    topic: &str,
) where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin + Send + 'static,
    T: EventTransport + 'static,
{
    let request = match read_request(&mut receiver, topic).await {
        Ok(request) => request,
        Err(message) => {
            debug!(topic = %topic, error = %message, "Rejected websocket request");
            if let Err(e) = transport.send(&StreamEvent::Error { message }).await {
                debug!(error = %e, "Could not report rejected request");
            }
            transport.close().await;
            return;
        }
    };

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(watch_for_close(receiver, cancel.clone()));

    service.stream_messages(request, transport, cancel).await;

    watcher.abort();
}

async fn read_request<R>(receiver: &mut R, topic: &str) -> Result<ListMessageRequest, String>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(REQUEST_FRAME_TIMEOUT, receiver.next())
            .await
            .map_err(|_| "timed out waiting for the list messages request".to_string())?;

        match frame {
            Some(Ok(Message::Text(text))) => return parse_request(&text, topic),
            Some(Ok(Message::Binary(bytes))) => {
                let text = String::from_utf8(bytes)
                    .map_err(|_| "request frame is not valid UTF-8".to_string())?;
                return parse_request(&text, topic);
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                return Err("connection closed before a request was sent".to_string())
            }
            Some(Err(e)) => return Err(e.to_string()),
        }
    }
}

fn parse_request(text: &str, topic: &str) -> Result<ListMessageRequest, String> {
    let mut request: ListMessageRequest =
        serde_json::from_str(text).map_err(|e| format!("invalid request: {e}"))?;
    request.topic_name = topic.to_string();
    Ok(request)
}

// Anything but a regular frame means the client is gone.
async fn watch_for_close<R>(mut receiver: R, cancel: CancellationToken)
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    cancel.cancel();
}

struct WebSocketTransport {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl EventTransport for WebSocketTransport {
    async fn send(&mut self, event: &StreamEvent) -> Result<(), TransportError> {
        let text = serde_json::to_string(event)?;
        self.sender
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sender.close().await {
            debug!(error = %e, "Websocket close failed");
        }
    }
}

/// Same protocol as the WebSocket endpoint, for clients that prefer
/// server-sent events: the request is the JSON body, every event is one SSE
/// `data` frame. Requests that fail validation are rejected with a 400
/// before the stream opens.
pub async fn list_messages_sse(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(mut request): Json<ListMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    request.topic_name = topic;
    state.service.validate(&request)?;

    let (sender, receiver) = mpsc::channel(state.event_buffer.max(1));
    let service = state.service.clone();
    tokio::spawn(async move {
        service
            .stream_messages(request, ChannelTransport::new(sender), CancellationToken::new())
            .await;
    });

    let events = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            let event = receiver.recv().await?;
            if let Some(frame) = sse_frame(&event) {
                return Some((Ok(frame), receiver));
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE).text("keepalive")))
}

// An event that cannot be encoded is dropped rather than sent as an empty frame.
fn sse_frame<E: Serialize>(event: &E) -> Option<Event> {
    match Event::default().json_data(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "Dropping event that could not be encoded");
            None
        }
    }
}
