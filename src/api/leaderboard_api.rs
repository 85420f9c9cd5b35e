//! Leaderboard API Endpoints
//! Read-only view over the ranked store and pipeline counters.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::models::LeaderboardEntry;
use crate::signals::{DbLeaderboard, FlagQueue, PipelineStats, StatsSnapshot};

const MAX_PAGE_LIMIT: usize = 500;

#[derive(Clone)]
pub struct ApiState {
    pub leaderboard: Arc<DbLeaderboard>,
    pub queue: Arc<FlagQueue>,
    pub stats: Arc<PipelineStats>,
}

/// Query parameters for the paginated leaderboard
#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub results: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub queue_depth: usize,
    pub leaderboard_size: usize,
    #[serde(flatten)]
    pub pipeline: StatsSnapshot,
}

#[derive(Debug)]
pub enum ApiError {
    Database(anyhow::Error),
    NotFound(String),
    BadRequest(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Database(err) => {
                tracing::error!("Leaderboard store error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// GET /leaderboard?page=P&limit=N
/// Most significant traders first; `page` is 1-based
pub async fn get_leaderboard(
    State(state): State<ApiState>,
    Query(params): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    if params.page == 0 {
        return Err(ApiError::BadRequest("page starts at 1".into()));
    }
    if params.limit == 0 {
        return Err(ApiError::BadRequest("limit must be positive".into()));
    }
    let limit = params.limit.min(MAX_PAGE_LIMIT);

    // A page whose offset overflows is past the end of any board.
    let results = match (params.page - 1).checked_mul(limit) {
        Some(offset) => state.leaderboard.range(offset, limit)?,
        None => Vec::new(),
    };
    let total = state.leaderboard.len()?;

    Ok(Json(LeaderboardResponse {
        page: params.page,
        limit,
        total,
        results,
    }))
}

/// GET /leaderboard/:user
pub async fn get_trader(
    State(state): State<ApiState>,
    Path(user): Path<String>,
) -> Result<Json<LeaderboardEntry>, ApiError> {
    state
        .leaderboard
        .rank_of(&user)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} is not on the leaderboard", user)))
}

/// GET /stats
pub async fn get_stats(State(state): State<ApiState>) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(StatsResponse {
        queue_depth: state.queue.len(),
        leaderboard_size: state.leaderboard.len()?,
        pipeline: state.stats.snapshot(),
    }))
}
