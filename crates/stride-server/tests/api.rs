//! End-to-end REST flows against an in-memory database, driven through the
//! router without binding a socket.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use chrono::{Duration, NaiveDate};
use serde_json::{Value, json};
use tower::ServiceExt;

use stride::{app_state, router};
use stride_db::Database;

fn app() -> Router {
    let db = Database::open_in_memory().unwrap();
    router(app_state(db, "test-secret".into(), 30))
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Registers a user and returns `(token, user_id)`.
async fn register(app: &Router, username: &str) -> (String, String) {
    let (status, body) = call(
        app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({ "username": username, "password": "correct-horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let res = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/posts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, Method::GET, "/posts", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_login_and_duplicate_username() {
    let app = app();
    let (token, user_id) = register(&app, "rio").await;

    let (status, me) = call(&app, Method::GET, "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user_id.as_str());

    let (status, _) = call(
        &app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({ "username": "rio", "password": "another-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "username": "rio", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "username": "rio", "password": "correct-horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "rio");
}

#[tokio::test]
async fn new_post_tops_the_feed() {
    let app = app();
    let (token, user_id) = register(&app, "rio").await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/posts",
        Some(&token),
        Some(json!({ "content": "Easy recovery jog", "category": "Running" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, created) = call(
        &app,
        Method::POST,
        "/posts",
        Some(&token),
        Some(json!({ "content": "Morning run done!", "category": "Running" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, feed) = call(&app, Method::GET, "/posts", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let top = &feed[0];
    assert_eq!(top["id"], created["id"]);
    assert_eq!(top["content"], "Morning run done!");
    assert_eq!(top["category"], "Running");
    assert_eq!(top["author_id"], user_id.as_str());
    assert_eq!(top["like_count"], 0);
    assert_eq!(top["comment_count"], 0);

    let (status, _) = call(
        &app,
        Method::POST,
        "/posts",
        Some(&token),
        Some(json!({ "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn likes_toggle_and_comments_count() {
    let app = app();
    let (rio, _) = register(&app, "rio").await;
    let (ana, _) = register(&app, "ana").await;

    let (_, post) = call(&app, Method::POST, "/posts", Some(&rio), Some(json!({ "content": "5k PB" }))).await;
    let post_id = post["id"].as_str().unwrap();
    let like_uri = format!("/posts/{}/like", post_id);

    let (status, like) = call(&app, Method::POST, &like_uri, Some(&ana), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(like["liked"], true);
    assert_eq!(like["post"]["like_count"], 1);

    let (_, unlike) = call(&app, Method::POST, &like_uri, Some(&ana), None).await;
    assert_eq!(unlike["liked"], false);
    assert_eq!(unlike["post"]["like_count"], 0);

    let comments_uri = format!("/posts/{}/comments", post_id);
    let (status, _) = call(
        &app,
        Method::POST,
        &comments_uri,
        Some(&ana),
        Some(json!({ "content": "nice pace" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, comments) = call(&app, Method::GET, &comments_uri, Some(&rio), None).await;
    assert_eq!(comments.as_array().unwrap().len(), 1);
    assert_eq!(comments[0]["author_username"], "ana");

    // Only the author may delete
    let post_uri = format!("/posts/{}", post_id);
    let (status, _) = call(&app, Method::DELETE, &post_uri, Some(&ana), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::DELETE, &post_uri, Some(&rio), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn partner_request_lifecycle() {
    let app = app();
    let (rio, rio_id) = register(&app, "rio").await;
    let (ana, ana_id) = register(&app, "ana").await;

    let (status, request) = call(
        &app,
        Method::POST,
        "/partners/requests",
        Some(&rio),
        Some(json!({ "recipient_id": ana_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "PENDING");
    let request_id = request["id"].as_str().unwrap().to_string();

    // Either direction counts as an existing connection
    let (status, _) = call(
        &app,
        Method::POST,
        "/partners/requests",
        Some(&ana),
        Some(json!({ "recipient_id": rio_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        Method::POST,
        "/partners/requests",
        Some(&rio),
        Some(json!({ "recipient_id": rio_id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, pending) = call(&app, Method::GET, "/partners/requests", Some(&ana), None).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["id"], request_id.as_str());
    assert_eq!(pending[0]["requester_id"], rio_id.as_str());
    let (_, sent) = call(&app, Method::GET, "/partners/requests/sent", Some(&rio), None).await;
    assert_eq!(sent.as_array().unwrap().len(), 1);

    // Only the recipient answers
    let accept_uri = format!("/partners/requests/{}/accept", request_id);
    let (status, _) = call(&app, Method::POST, &accept_uri, Some(&rio), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, accepted) = call(&app, Method::POST, &accept_uri, Some(&ana), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "ACCEPTED");

    let (status, _) = call(&app, Method::POST, &accept_uri, Some(&ana), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, partners) = call(&app, Method::GET, "/partners", Some(&rio), None).await;
    assert_eq!(partners.as_array().unwrap().len(), 1);
    assert_eq!(partners[0]["id"], ana_id.as_str());
    let (_, partners) = call(&app, Method::GET, "/partners", Some(&ana), None).await;
    assert_eq!(partners[0]["id"], rio_id.as_str());

    let (_, pending) = call(&app, Method::GET, "/partners/requests", Some(&ana), None).await;
    assert!(pending.as_array().unwrap().is_empty());
    let (_, sent) = call(&app, Method::GET, "/partners/requests/sent", Some(&rio), None).await;
    assert!(sent.as_array().unwrap().is_empty());

    let (status, _) = call(&app, Method::DELETE, &format!("/partners/{}", ana_id), Some(&rio), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, partners) = call(&app, Method::GET, "/partners", Some(&ana), None).await;
    assert!(partners.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn goal_completes_after_thirty_daily_check_ins() {
    let app = app();
    let (token, _) = register(&app, "rio").await;

    let (status, goal) = call(
        &app,
        Method::POST,
        "/goals",
        Some(&token),
        Some(json!({
            "title": "Run every day",
            "category": "Running",
            "frequency": "daily",
            "target_check_ins": 30,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(goal["status"], "active");
    let check_in_uri = format!("/goals/{}/check-ins", goal["id"].as_str().unwrap());

    let start = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
    for day in 0..30 {
        let date = start + Duration::days(day);
        let (status, body) = call(
            &app,
            Method::POST,
            &check_in_uri,
            Some(&token),
            Some(json!({ "date": date })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "day {}", day);
        assert_eq!(body["goal"]["completed_check_ins"], day + 1);

        if day == 0 {
            // A second check-in for the same day is refused
            let (status, _) = call(
                &app,
                Method::POST,
                &check_in_uri,
                Some(&token),
                Some(json!({ "date": date })),
            )
            .await;
            assert_eq!(status, StatusCode::CONFLICT);
        }
    }

    let (_, history) = call(&app, Method::GET, &check_in_uri, Some(&token), None).await;
    assert_eq!(history.as_array().unwrap().len(), 30);

    let (_, active) = call(&app, Method::GET, "/goals?status=active", Some(&token), None).await;
    assert!(active.as_array().unwrap().is_empty());

    let (_, completed) = call(&app, Method::GET, "/goals?status=completed", Some(&token), None).await;
    assert_eq!(completed[0]["status"], "completed");
    assert!(completed[0]["completed_at"].is_string());

    let (status, _) = call(
        &app,
        Method::POST,
        &check_in_uri,
        Some(&token),
        Some(json!({ "date": start + Duration::days(40) })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, board) = call(&app, Method::GET, "/leaderboard", Some(&token), None).await;
    assert_eq!(board[0]["rank"], 1);
    assert_eq!(board[0]["check_ins"], 30);
    assert_eq!(board[0]["completed_goals"], 1);
    assert_eq!(board[0]["score"], 40);
}

#[tokio::test]
async fn direct_conversation_messages_and_read_state() {
    let app = app();
    let (rio, _) = register(&app, "rio").await;
    let (ana, ana_id) = register(&app, "ana").await;

    let (status, conversation) = call(
        &app,
        Method::POST,
        "/conversations/direct",
        Some(&rio),
        Some(json!({ "user_id": ana_id })),
    )
    .await;
    assert!(status.is_success());
    let conversation_id = conversation["id"].as_str().unwrap().to_string();

    // Opening the same pair again returns the same conversation
    let (_, again) = call(
        &app,
        Method::POST,
        "/conversations/direct",
        Some(&rio),
        Some(json!({ "user_id": ana_id })),
    )
    .await;
    assert_eq!(again["id"], conversation_id.as_str());

    let messages_uri = format!("/conversations/{}/messages", conversation_id);
    let (status, sent) = call(
        &app,
        Method::POST,
        &messages_uri,
        Some(&rio),
        Some(json!({ "text": "tempo at 7?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["text"], "tempo at 7?");

    let (status, _) = call(&app, Method::POST, &messages_uri, Some(&rio), Some(json!({ "text": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, inbox) = call(&app, Method::GET, "/conversations", Some(&ana), None).await;
    assert_eq!(inbox[0]["unread_count"], 1);
    assert_eq!(inbox[0]["last_message"]["preview"], "tempo at 7?");

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/conversations/{}/read", conversation_id),
        Some(&ana),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, inbox) = call(&app, Method::GET, "/conversations", Some(&ana), None).await;
    assert_eq!(inbox[0]["unread_count"], 0);

    let (_, pin) = call(
        &app,
        Method::POST,
        &format!("/conversations/{}/pin", conversation_id),
        Some(&ana),
        None,
    )
    .await;
    assert_eq!(pin["pinned"], true);

    // Outsiders see nothing
    let (eve, _) = register(&app, "eve").await;
    let (status, _) = call(&app, Method::GET, &messages_uri, Some(&eve), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
