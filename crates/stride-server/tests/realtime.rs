//! Gateway behaviour over real sockets: a server bound to an ephemeral port
//! and client cores connected to it.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use stride::{app_state, router};
use stride_client::{ChatClient, ClientConfig, ClientError, ClientEvent, Delivery, Draft, EventFilter, Session};
use stride_db::Database;
use stride_types::api::AuthResponse;
use stride_types::models::Conversation;

const WAIT: Duration = Duration::from_secs(5);
/// Room joins are confirmed by nothing; give the server time to apply them.
const SETTLE: Duration = Duration::from_millis(300);

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(app_state(Database::open_in_memory().unwrap(), "test-secret".into(), 30));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn register(addr: SocketAddr, username: &str) -> AuthResponse {
    let res = reqwest::Client::new()
        .post(format!("http://{}/auth/register", addr))
        .json(&json!({ "username": username, "password": "correct-horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn open_direct(addr: SocketAddr, auth: &AuthResponse, other: Uuid) -> Conversation {
    reqwest::Client::new()
        .post(format!("http://{}/conversations/direct", addr))
        .bearer_auth(&auth.token)
        .json(&json!({ "user_id": other }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn client(addr: SocketAddr, auth: AuthResponse) -> ChatClient {
    ChatClient::new(
        ClientConfig::new(format!("ws://{}/gateway", addr)),
        Session::from(auth),
    )
}

#[tokio::test]
async fn presence_is_shared_between_clients() {
    let addr = spawn_server().await;
    let rio_auth = register(addr, "rio").await;
    let ana_auth = register(addr, "ana").await;
    let ana_id = ana_auth.user.id;
    let rio_id = rio_auth.user.id;

    let rio = client(addr, rio_auth);
    rio.connect().await.unwrap();

    let mut rio_events = rio.subscribe(EventFilter::custom(move |e| {
        matches!(e, ClientEvent::PresenceChanged { user_id, .. } if *user_id == ana_id)
    }));

    let ana = client(addr, ana_auth);
    let mut ana_events = ana.subscribe(EventFilter::custom(move |e| {
        matches!(e, ClientEvent::PresenceChanged { user_id, online: true } if *user_id == rio_id)
    }));
    ana.connect().await.unwrap();

    // Ana learns about rio from the initial online list
    tokio::time::timeout(WAIT, ana_events.recv()).await.unwrap().unwrap();
    assert!(ana.is_online(rio_id));

    let online = tokio::time::timeout(WAIT, rio_events.recv()).await.unwrap().unwrap();
    assert_eq!(online, ClientEvent::PresenceChanged { user_id: ana_id, online: true });

    ana.disconnect();
    let offline = tokio::time::timeout(WAIT, rio_events.recv()).await.unwrap().unwrap();
    assert_eq!(offline, ClientEvent::PresenceChanged { user_id: ana_id, online: false });
    assert!(!rio.is_online(ana_id));
    assert!(ana.online_users().is_empty());
}

#[tokio::test]
async fn messages_reach_the_room_but_not_their_author() {
    let addr = spawn_server().await;
    let rio_auth = register(addr, "rio").await;
    let ana_auth = register(addr, "ana").await;
    let conversation = open_direct(addr, &rio_auth, ana_auth.user.id).await;
    let conv = conversation.id;

    let rio = client(addr, rio_auth);
    let ana = client(addr, ana_auth);
    rio.connect().await.unwrap();
    ana.connect().await.unwrap();
    rio.load_conversations(vec![conversation.clone()]);
    ana.load_conversations(vec![conversation]);

    rio.open_conversation(Some(conv));
    ana.open_conversation(Some(conv));
    tokio::time::sleep(SETTLE).await;

    let mut rio_received = rio.subscribe(EventFilter::custom(|e| matches!(e, ClientEvent::MessageReceived { .. })));
    let mut ana_events = ana.subscribe(EventFilter::custom(|e| {
        matches!(e, ClientEvent::MessageConfirmed { .. } | ClientEvent::MessageReceived { .. })
    }));

    let client_id = ana.send_message(Draft::text(conv, "Intervals at 6?")).unwrap();
    assert_eq!(ana.message_entry(client_id).unwrap().delivery, Delivery::Pending);

    let confirmed = tokio::time::timeout(WAIT, ana_events.recv()).await.unwrap().unwrap();
    let ClientEvent::MessageConfirmed { client_id: echoed, message } = confirmed else {
        panic!("expected a confirmation, got {:?}", confirmed);
    };
    assert_eq!(echoed, client_id);
    assert_eq!(message.text.as_deref(), Some("Intervals at 6?"));

    let received = tokio::time::timeout(WAIT, rio_received.recv()).await.unwrap().unwrap();
    assert_eq!(received, ClientEvent::MessageReceived { message: message.clone() });
    assert_eq!(rio.thread(conv).len(), 1);
    // Active conversation: read on arrival
    assert_eq!(rio.unread_count(conv), 0);

    // The author never gets its own message echoed back as a receive
    tokio::time::sleep(SETTLE).await;
    assert!(ana_events.try_recv().is_none());
    let thread = ana.thread(conv);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].delivery, Delivery::Confirmed);
    assert_eq!(thread[0].message.id, message.id);
}

#[tokio::test]
async fn messages_reach_members_with_no_conversation_open() {
    let addr = spawn_server().await;
    let rio_auth = register(addr, "rio").await;
    let ana_auth = register(addr, "ana").await;
    let conversation = open_direct(addr, &rio_auth, ana_auth.user.id).await;
    let conv = conversation.id;

    let rio = client(addr, rio_auth);
    let ana = client(addr, ana_auth);
    rio.connect().await.unwrap();
    ana.connect().await.unwrap();
    rio.load_conversations(vec![conversation]);
    assert!(rio.joined_rooms().is_empty());

    let mut rio_received = rio.subscribe(EventFilter::custom(|e| matches!(e, ClientEvent::MessageReceived { .. })));
    ana.send_message(Draft::text(conv, "Intervals at 6?")).unwrap();

    let received = tokio::time::timeout(WAIT, rio_received.recv()).await.unwrap().unwrap();
    let ClientEvent::MessageReceived { message } = received else {
        panic!("expected a message, got {:?}", received);
    };
    assert_eq!(message.text.as_deref(), Some("Intervals at 6?"));
    assert_eq!(rio.thread(conv).len(), 1);
    assert_eq!(rio.unread_count(conv), 1);
    let preview = rio.conversation(conv).unwrap().last_message.unwrap().preview;
    assert_eq!(preview, "Intervals at 6?");
}

#[tokio::test]
async fn typing_indicator_clears_when_switching_conversations() {
    let addr = spawn_server().await;
    let rio_auth = register(addr, "rio").await;
    let ana_auth = register(addr, "ana").await;
    let rio_id = rio_auth.user.id;
    let conversation = open_direct(addr, &rio_auth, ana_auth.user.id).await;
    let conv = conversation.id;

    let rio = client(addr, rio_auth);
    let ana = client(addr, ana_auth);
    rio.connect().await.unwrap();
    ana.connect().await.unwrap();
    rio.open_conversation(Some(conv));
    ana.open_conversation(Some(conv));
    tokio::time::sleep(SETTLE).await;

    let mut typing = ana.subscribe(EventFilter::conversation(conv));
    assert!(rio.start_typing(conv));
    let changed = tokio::time::timeout(WAIT, typing.recv()).await.unwrap().unwrap();
    assert_eq!(changed, ClientEvent::TypingChanged { conversation_id: conv });

    let typists = ana.typing_in(conv);
    assert_eq!(typists.len(), 1);
    assert_eq!(typists[0].user_id, rio_id);
    assert_eq!(typists[0].username, "rio");

    ana.open_conversation(None);
    assert!(ana.typing_in(conv).is_empty());

    // Ana left the room: further typing from rio never shows up
    assert!(rio.start_typing(conv));
    tokio::time::sleep(SETTLE).await;
    assert!(ana.typing_in(conv).is_empty());
}

#[tokio::test]
async fn outsiders_cannot_join_a_room() {
    let addr = spawn_server().await;
    let rio_auth = register(addr, "rio").await;
    let ana_auth = register(addr, "ana").await;
    let eve_auth = register(addr, "eve").await;
    let conversation = open_direct(addr, &rio_auth, ana_auth.user.id).await;

    let eve = client(addr, eve_auth);
    eve.connect().await.unwrap();
    let mut errors = eve.subscribe(EventFilter::custom(|e| matches!(e, ClientEvent::ServerError { .. })));

    assert!(eve.join_room(conversation.id));
    let refused = tokio::time::timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(refused, ClientEvent::ServerError { .. }));
    // A refused room is not retried on reconnect
    assert!(eve.joined_rooms().is_empty());
}

#[tokio::test]
async fn bad_credentials_are_rejected_before_upgrade() {
    let addr = spawn_server().await;
    let mut auth = register(addr, "rio").await;
    auth.token = "not-a-jwt".into();

    let rio = client(addr, auth);
    let err = rio.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::AuthRejected), "got {:?}", err);
    assert!(rio.last_error().is_some());
}
