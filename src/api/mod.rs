pub mod leaderboard_api;

use axum::{middleware, routing::get, Router};
use tower_http::cors::CorsLayer;

use crate::middleware::request_logging;

pub use leaderboard_api::{ApiError, ApiState, LeaderboardResponse, StatsResponse};

/// Public read-only routes.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/leaderboard", get(leaderboard_api::get_leaderboard))
        .route("/leaderboard/:user", get(leaderboard_api::get_trader))
        .route("/stats", get(leaderboard_api::get_stats))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
