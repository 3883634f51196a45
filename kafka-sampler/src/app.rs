use axum::{extract::State, http::StatusCode, routing::get, routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::{get_partitions, list_messages_sse, list_messages_ws};
use crate::orchestrator::ListMessagesService;

#[derive(Clone)]
pub struct AppState {
    pub service: ListMessagesService,
    /// Events buffered between a request and a slow SSE client.
    pub event_buffer: usize,
    pub version: String,
}

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/topics/:topic/partitions", get(get_partitions))
        .route("/api/topics/:topic/messages", post(list_messages_sse))
        .route("/api/topics/:topic/messages/ws", get(list_messages_ws));

    let health_routes = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .route("/_readiness", get(readiness));

    Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> String {
    format!("kafka-sampler {}", state.version)
}

async fn liveness() -> &'static str {
    "ok"
}

async fn readiness(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    state
        .service
        .client()
        .health_check()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok("ok")
}
