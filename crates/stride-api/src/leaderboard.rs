use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::auth::AppState;
use crate::error::ApiError;

/// Size of the board pushed in `leaderboard_updated` events.
pub const BROADCAST_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    BROADCAST_LIMIT
}

pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.clamp(1, 100);
    let entries = state.run_db(move |db| db.leaderboard(limit)).await?;
    Ok(Json(entries))
}
