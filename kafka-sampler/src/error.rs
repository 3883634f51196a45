use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::filter::FilterError;
use crate::kafka::KafkaClientError;

/// A list-messages request that was rejected before any I/O.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("topic name is required")]
    MissingTopic,

    #[error("message count must be between 1 and {max}, got {requested}")]
    MessageCountOutOfRange { requested: u16, max: u16 },

    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("partition {partition} does not exist in topic '{topic}' ({partition_count} partitions)")]
    PartitionNotFound {
        topic: String,
        partition: i32,
        partition_count: usize,
    },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Kafka error: {0}")]
    Kafka(KafkaClientError),
}

impl From<KafkaClientError> for AppError {
    fn from(e: KafkaClientError) -> Self {
        match e {
            KafkaClientError::TopicNotFound(topic) => {
                AppError::NotFound(format!("topic '{topic}' does not exist"))
            }
            other => AppError::Kafka(other),
        }
    }
}

impl From<RequestError> for AppError {
    fn from(e: RequestError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::Kafka(_) => (StatusCode::BAD_GATEWAY, "Kafka error"),
        };

        tracing::error!(error = ?self, status = %status, "Request error");

        let body = Json(json!({
            "error": message,
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
