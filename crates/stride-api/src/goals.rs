use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use stride_db::CheckInOutcome;
use stride_types::api::{CheckInRequest, CheckInResponse, Claims, CreateGoalRequest, UpdateGoalRequest};
use stride_types::events::ServerEvent;
use stride_types::models::GoalStatus;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::leaderboard::BROADCAST_LIMIT;

const MAX_TITLE_LEN: usize = 120;

#[derive(Debug, Deserialize)]
pub struct GoalQuery {
    pub status: Option<GoalStatus>,
}

fn validate_title(title: &str) -> Result<(), ApiError> {
    let len = title.trim().chars().count();
    if len == 0 || len > MAX_TITLE_LEN {
        return Err(ApiError::bad_request("title must be 1-120 characters"));
    }
    Ok(())
}

fn validate_target(target: u32) -> Result<(), ApiError> {
    if target == 0 {
        return Err(ApiError::bad_request("target_check_ins must be at least 1"));
    }
    Ok(())
}

pub async fn list_goals(
    State(state): State<AppState>,
    Query(query): Query<GoalQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = claims.sub;
    let goals = state.run_db(move |db| db.list_goals(owner, query.status)).await?;
    Ok(Json(goals))
}

pub async fn create_goal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGoalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_title(&req.title)?;
    validate_target(req.target_check_ins)?;

    let owner = claims.sub;
    let goal = state.run_db(move |db| db.create_goal(owner, &req)).await?;
    info!("{} created goal {} ({})", claims.username, goal.id, goal.frequency);

    Ok((StatusCode::CREATED, Json(goal)))
}

pub async fn get_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = claims.sub;
    let goal = state
        .run_db(move |db| db.get_goal(owner, goal_id))
        .await?
        .ok_or(ApiError::NotFound("goal"))?;
    Ok(Json(goal))
}

pub async fn update_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateGoalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(title) = &req.title {
        validate_title(title)?;
    }
    if let Some(target) = req.target_check_ins {
        validate_target(target)?;
    }

    let owner = claims.sub;
    let goal = state
        .run_db(move |db| db.update_goal(owner, goal_id, &req))
        .await?
        .ok_or(ApiError::NotFound("goal"))?;
    Ok(Json(goal))
}

pub async fn delete_goal(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = claims.sub;
    if !state.run_db(move |db| db.delete_goal(owner, goal_id)).await? {
        return Err(ApiError::NotFound("goal"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_check_ins(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = claims.sub;
    let check_ins = state
        .run_db(move |db| {
            if db.get_goal(owner, goal_id)?.is_none() {
                return Ok(None);
            }
            db.list_check_ins(goal_id).map(Some)
        })
        .await?
        .ok_or(ApiError::NotFound("goal"))?;
    Ok(Json(check_ins))
}

/// One check-in per period (day or ISO week). Reaching the target completes
/// the goal. Every recorded check-in moves the leaderboard.
pub async fn check_in(
    State(state): State<AppState>,
    Path(goal_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CheckInRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = claims.sub;
    let date = req.date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let note = req.note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

    let (outcome, entries) = state
        .run_db(move |db| {
            let outcome = db.record_check_in(owner, goal_id, date, note.as_deref())?;
            let entries = match outcome {
                CheckInOutcome::Recorded { .. } => Some(db.leaderboard(BROADCAST_LIMIT)?),
                _ => None,
            };
            Ok((outcome, entries))
        })
        .await?;

    let (goal, check_in) = match outcome {
        CheckInOutcome::Recorded { goal, check_in } => (goal, check_in),
        CheckInOutcome::NotFound => return Err(ApiError::NotFound("goal")),
        CheckInOutcome::AlreadyCompleted => return Err(ApiError::conflict("goal is already completed")),
        CheckInOutcome::DuplicatePeriod => {
            return Err(ApiError::conflict("already checked in for this period"));
        }
    };

    if goal.status == GoalStatus::Completed {
        info!("{} completed goal {}", claims.username, goal.id);
    }
    if let Some(entries) = entries {
        state.dispatcher.broadcast(ServerEvent::LeaderboardUpdated { entries });
    }

    Ok((StatusCode::CREATED, Json(CheckInResponse { goal, check_in })))
}
