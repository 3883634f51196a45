use axum::{
    extract::{Path, State},
    Json,
};

use crate::app::AppState;
use crate::error::Result;
use crate::types::Watermark;

/// Partitions of a topic with their current watermarks, in partition order.
pub async fn get_partitions(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<Vec<Watermark>>> {
    let client = state.service.client();
    let partition_ids = client.partition_ids(&topic).await?;
    let watermarks = client.watermarks(&topic, &partition_ids).await?;

    Ok(Json(watermarks.into_values().collect()))
}
