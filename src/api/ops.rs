//! Operational endpoints (admin)
//!
//! - GET /api/v1/ops/queue - Expiry job queue depth
//! - GET /api/v1/ops/stats - Request statistics

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};

/// Response for queue depth
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueDepthResponse {
    pub pending: i64,
    pub failed: i64,
}

/// Response for request statistics
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_requests: u64,
    pub avg_response_time_us: f64,
    pub uptime_seconds: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue", get(get_queue_depth))
        .route("/stats", get(get_stats))
}

/// GET /api/v1/ops/queue - Pending and failed expiry jobs
async fn get_queue_depth(
    State(state): State<AppState>,
) -> Result<Json<QueueDepthResponse>, ApiError> {
    let depth = state
        .job_repo
        .queue_depth()
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(QueueDepthResponse {
        pending: depth.pending,
        failed: depth.failed,
    }))
}

/// GET /api/v1/ops/stats - Aggregate request statistics
async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        total_requests: state.request_stats.total_requests(),
        avg_response_time_us: state.request_stats.avg_response_time_us(),
        uptime_seconds: state.request_stats.uptime_seconds(),
    })
}
