use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use stride_api::auth::{self, AppState, AppStateInner};
use stride_api::error::ApiError;
use stride_api::middleware::{bearer_token, decode_token, require_auth};
use stride_api::{chat, goals, leaderboard, partners, posts, users};
use stride_db::Database;
use stride_gateway::connection;
use stride_gateway::dispatcher::Dispatcher;

const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

/// Server settings, read from `STRIDE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub token_ttl_days: i64,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret =
            std::env::var("STRIDE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
        let db_path = std::env::var("STRIDE_DB_PATH").unwrap_or_else(|_| "stride.db".into());
        let host = std::env::var("STRIDE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("STRIDE_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .context("STRIDE_PORT must be a port number")?;
        let token_ttl_days: i64 = std::env::var("STRIDE_TOKEN_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            jwt_secret,
            db_path: db_path.into(),
            host,
            port,
            token_ttl_days,
        })
    }

    /// Refuses empty or placeholder secrets. Debug builds accept placeholders
    /// so a fresh checkout runs without a `.env`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("STRIDE_JWT_SECRET is empty");
        }
        if !cfg!(debug_assertions) && PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str()) {
            bail!("STRIDE_JWT_SECRET is still a placeholder; set it in your .env file");
        }
        if self.token_ttl_days <= 0 {
            bail!("STRIDE_TOKEN_TTL_DAYS must be positive");
        }
        Ok(())
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

/// Shared state for a database and a fresh dispatcher.
pub fn app_state(db: Database, jwt_secret: String, token_ttl_days: i64) -> AppState {
    Arc::new(AppStateInner {
        db: Arc::new(db),
        jwt_secret,
        token_ttl_days,
        dispatcher: Dispatcher::new(),
    })
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/users/me", put(users::update_me))
        .route("/users/{user_id}", get(users::get_user))
        // Goals
        .route("/goals", get(goals::list_goals).post(goals::create_goal))
        .route(
            "/goals/{goal_id}",
            get(goals::get_goal).put(goals::update_goal).delete(goals::delete_goal),
        )
        .route(
            "/goals/{goal_id}/check-ins",
            get(goals::list_check_ins).post(goals::check_in),
        )
        // Partners
        .route("/partners", get(partners::list_partners))
        .route("/partners/suggestions", get(partners::suggestions))
        .route(
            "/partners/requests",
            get(partners::pending_requests).post(partners::send_request),
        )
        .route("/partners/requests/sent", get(partners::sent_requests))
        .route("/partners/requests/{request_id}/accept", post(partners::accept_request))
        .route("/partners/requests/{request_id}/reject", post(partners::reject_request))
        .route("/partners/{user_id}", delete(partners::remove_partner))
        // Feed
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route("/posts/{post_id}", delete(posts::delete_post))
        .route("/posts/{post_id}/like", post(posts::toggle_like))
        .route(
            "/posts/{post_id}/comments",
            get(posts::list_comments).post(posts::add_comment),
        )
        // Chat
        .route("/conversations", get(chat::list_conversations))
        .route("/conversations/direct", post(chat::open_direct))
        .route("/conversations/{conversation_id}", get(chat::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(chat::get_messages).post(chat::send_message),
        )
        .route("/conversations/{conversation_id}/read", post(chat::mark_read))
        .route("/conversations/{conversation_id}/pin", post(chat::toggle_pin))
        .route("/conversations/{conversation_id}/mute", post(chat::toggle_mute))
        .route("/groups", post(chat::create_group))
        .route("/groups/{group_id}/join", post(chat::join_group))
        .route("/groups/{group_id}/leave", post(chat::leave_group))
        .route("/leaderboard", get(leaderboard::get_leaderboard))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// WebSocket upgrade. The token comes from the `Authorization` header or,
/// for clients that cannot set headers on upgrade, the `token` query param.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = bearer_token(&headers).or(query.token) else {
        debug!("Gateway upgrade without credentials");
        return ApiError::Unauthorized.into_response();
    };
    let Some(claims) = decode_token(&state.jwt_secret, &token) else {
        return ApiError::Unauthorized.into_response();
    };

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, db, claims.sub, claims.username)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> ServerConfig {
        ServerConfig {
            jwt_secret: secret.into(),
            db_path: "stride.db".into(),
            host: "127.0.0.1".into(),
            port: 3000,
            token_ttl_days: 30,
        }
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(config("").validate().is_err());
        assert!(config("a-real-secret").validate().is_ok());
    }

    #[test]
    fn listen_address_parses() {
        assert_eq!(config("x").addr().unwrap().port(), 3000);
        let mut bad = config("x");
        bad.host = "not a host".into();
        assert!(bad.addr().is_err());
    }
}
