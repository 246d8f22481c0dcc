use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use stride_db::{MessageSendOutcome, NewMessage};
use stride_types::api::{
    Claims, CreateDirectRequest, CreateGroupRequest, MuteResponse, PinResponse, SendMessageRequest,
};
use stride_types::events::ServerEvent;

use crate::auth::AppState;
use crate::error::ApiError;

const MAX_GROUP_NAME_LEN: usize = 64;
const MAX_MESSAGE_LEN: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: `created_at` of the oldest message already loaded.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    Ok(Json(state.run_db(move |db| db.list_conversations(user)).await?))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let conversation = state
        .run_db(move |db| db.get_conversation(user, conversation_id))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;
    Ok(Json(conversation))
}

pub async fn open_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateDirectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.user_id == claims.sub {
        return Err(ApiError::bad_request("cannot start a conversation with yourself"));
    }

    let user = claims.sub;
    let conversation = state
        .run_db(move |db| db.get_or_create_direct(user, req.user_id))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(conversation))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let len = req.name.trim().chars().count();
    if len == 0 || len > MAX_GROUP_NAME_LEN {
        return Err(ApiError::bad_request("group name must be 1-64 characters"));
    }

    let creator = claims.sub;
    let group = state
        .run_db(move |db| db.create_group(creator, &req.name, &req.member_ids))
        .await?;
    info!("{} created group {} ({} members)", claims.username, group.id, group.participants.len());

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn join_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let group = state
        .run_db(move |db| db.join_group(user, group_id))
        .await?
        .ok_or(ApiError::NotFound("group"))?;
    Ok(Json(group))
}

pub async fn leave_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    if !state.run_db(move |db| db.leave_group(user, group_id)).await? {
        return Err(ApiError::NotFound("group membership"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let limit = query.limit.clamp(1, 200);
    let before = query.before;

    let messages = state
        .run_db(move |db| db.list_messages(user, conversation_id, limit, before))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;
    Ok(Json(messages))
}

/// REST send path. Members of the room get `receive_message`; the author
/// already has the stored message in the response.
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req
        .text
        .as_ref()
        .is_some_and(|text| text.chars().count() > MAX_MESSAGE_LEN)
    {
        return Err(ApiError::bad_request("message must be at most 4000 characters"));
    }

    let new_message = NewMessage {
        conversation_id,
        sender_id: claims.sub,
        text: req.text,
        media: req.media,
    };

    let (outcome, members) = state
        .run_db(move |db| {
            let outcome = db.insert_message(&new_message)?;
            let members = match &outcome {
                MessageSendOutcome::Sent(message) => db.conversation_members(message.conversation_id)?,
                _ => Vec::new(),
            };
            Ok((outcome, members))
        })
        .await?;

    match outcome {
        MessageSendOutcome::Sent(message) => {
            state
                .dispatcher
                .broadcast_to_members(ServerEvent::ReceiveMessage { message: message.clone() }, members);
            Ok((StatusCode::CREATED, Json(message)))
        }
        MessageSendOutcome::Empty => Err(ApiError::bad_request("message is empty")),
        MessageSendOutcome::NotMember => Err(ApiError::NotFound("conversation")),
    }
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let reader = claims.sub;
    let (read_at, members) = state
        .run_db(move |db| match db.mark_read(reader, conversation_id)? {
            Some(read_at) => Ok(Some((read_at, db.conversation_members(conversation_id)?))),
            None => Ok(None),
        })
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;

    state.dispatcher.broadcast_to_members(
        ServerEvent::MessagesRead {
            conversation_id,
            reader_id: reader,
            read_at,
        },
        members,
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_pin(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let pinned = state
        .run_db(move |db| db.toggle_pin(user, conversation_id))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;
    Ok(Json(PinResponse { pinned }))
}

pub async fn toggle_mute(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    let muted = state
        .run_db(move |db| db.toggle_mute(user, conversation_id))
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;
    Ok(Json(MuteResponse { muted }))
}
