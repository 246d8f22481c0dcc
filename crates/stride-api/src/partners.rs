use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use stride_db::{RequestOutcome, RespondOutcome};
use stride_types::api::{Claims, PartnerRequest};

use crate::auth::AppState;
use crate::error::ApiError;

const SUGGESTION_LIMIT: usize = 10;

pub async fn list_partners(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    Ok(Json(state.run_db(move |db| db.list_partners(user)).await?))
}

pub async fn pending_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    Ok(Json(state.run_db(move |db| db.pending_requests(user)).await?))
}

pub async fn sent_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    Ok(Json(state.run_db(move |db| db.sent_requests(user)).await?))
}

pub async fn send_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PartnerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let requester = claims.sub;
    let recipient = req.recipient_id;

    match state
        .run_db(move |db| db.create_partner_request(requester, recipient))
        .await?
    {
        RequestOutcome::Created(connection) => {
            info!("{} requested partnership with {}", claims.username, recipient);
            Ok((StatusCode::CREATED, Json(connection)))
        }
        RequestOutcome::SelfRequest => Err(ApiError::bad_request("cannot partner with yourself")),
        RequestOutcome::UnknownUser => Err(ApiError::NotFound("user")),
        RequestOutcome::AlreadyExists => Err(ApiError::conflict("a partner connection already exists")),
    }
}

pub async fn accept_request(
    state: State<AppState>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    respond(state, path, claims, true).await
}

pub async fn reject_request(
    state: State<AppState>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    respond(state, path, claims, false).await
}

async fn respond(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    accept: bool,
) -> Result<impl IntoResponse, ApiError> {
    let recipient = claims.sub;

    match state
        .run_db(move |db| db.respond_to_request(recipient, request_id, accept))
        .await?
    {
        RespondOutcome::Updated(connection) => {
            info!("{} {} partner request {}", claims.username, connection.status, request_id);
            Ok(Json(connection))
        }
        RespondOutcome::NotFound => Err(ApiError::NotFound("partner request")),
        RespondOutcome::NotPending => Err(ApiError::conflict("request was already answered")),
    }
}

pub async fn remove_partner(
    State(state): State<AppState>,
    Path(partner_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    if !state.run_db(move |db| db.remove_partner(user, partner_id)).await? {
        return Err(ApiError::NotFound("partner"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn suggestions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = claims.sub;
    Ok(Json(
        state
            .run_db(move |db| db.partner_suggestions(user, SUGGESTION_LIMIT))
            .await?,
    ))
}
