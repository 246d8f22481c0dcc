use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use stride_types::api::{Claims, UpdateProfileRequest};

use crate::auth::AppState;
use crate::error::ApiError;

const MAX_DISPLAY_NAME_LEN: usize = 64;
const MAX_BIO_LEN: usize = 500;

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .run_db(move |db| db.get_profile(user_id))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(profile))
}

/// Profile setup and edits. Any successful update marks the user onboarded.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &req.display_name {
        let len = name.trim().chars().count();
        if len == 0 || len > MAX_DISPLAY_NAME_LEN {
            return Err(ApiError::bad_request("display name must be 1-64 characters"));
        }
    }
    if req.bio.as_ref().is_some_and(|bio| bio.chars().count() > MAX_BIO_LEN) {
        return Err(ApiError::bad_request("bio must be at most 500 characters"));
    }

    let user_id = claims.sub;
    let profile = state
        .run_db(move |db| db.update_profile(user_id, &req))
        .await?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(profile))
}
