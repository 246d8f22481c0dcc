use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use stride_types::api::{Claims, CreateCommentRequest, CreatePostRequest, LikeResponse};
use stride_types::events::ServerEvent;

use crate::auth::AppState;
use crate::error::ApiError;

const MAX_POST_LEN: usize = 2000;
const MAX_COMMENT_LEN: usize = 500;

#[derive(Debug, Deserialize)]
pub struct PostQuery {
    pub category: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

fn validate_content(content: &str, max: usize) -> Result<(), ApiError> {
    let len = content.trim().chars().count();
    if len == 0 {
        return Err(ApiError::bad_request("content must not be empty"));
    }
    if len > max {
        return Err(ApiError::bad_request(format!("content must be at most {} characters", max)));
    }
    Ok(())
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PostQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub;
    let limit = query.limit.clamp(1, 200);
    let category = query.category.filter(|c| !c.trim().is_empty());

    let posts = state
        .run_db(move |db| db.list_posts(viewer, category.as_deref(), limit))
        .await?;
    Ok(Json(posts))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_content(&req.content, MAX_POST_LEN)?;

    let author = claims.sub;
    let post = state
        .run_db(move |db| db.create_post(author, &req.content, &req.category, req.media.as_ref()))
        .await?;
    info!("{} published post {}", claims.username, post.id);

    state.dispatcher.broadcast(ServerEvent::PostCreated { post: post.clone() });

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let author = claims.sub;
    if !state.run_db(move |db| db.delete_post(author, post_id)).await? {
        return Err(ApiError::NotFound("post"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let (liked, post, public) = state
        .run_db(move |db| {
            let Some((liked, post)) = db.toggle_like(user, post_id)? else {
                return Ok(None);
            };
            let public = db.get_post(None, post_id)?;
            Ok(Some((liked, post, public)))
        })
        .await?
        .ok_or(ApiError::NotFound("post"))?;

    if let Some(public) = public {
        state.dispatcher.broadcast(ServerEvent::PostUpdated { post: public });
    }

    Ok(Json(LikeResponse { liked, post }))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state
        .run_db(move |db| {
            if db.get_post(None, post_id)?.is_none() {
                return Ok(None);
            }
            db.list_comments(post_id).map(Some)
        })
        .await?
        .ok_or(ApiError::NotFound("post"))?;
    Ok(Json(comments))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_content(&req.content, MAX_COMMENT_LEN)?;

    let author = claims.sub;
    let (comment, post) = state
        .run_db(move |db| {
            let Some(comment) = db.add_comment(author, post_id, &req.content)? else {
                return Ok(None);
            };
            Ok(Some((comment, db.get_post(None, post_id)?)))
        })
        .await?
        .ok_or(ApiError::NotFound("post"))?;

    if let Some(post) = post {
        state.dispatcher.broadcast(ServerEvent::PostUpdated { post });
    }

    Ok((StatusCode::CREATED, Json(comment)))
}
