use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use stride_db::{Database, MessageSendOutcome, NewMessage};
use stride_types::events::{ClientCommand, ServerEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Rooms (conversation ids) a connection joined. Shared between the send
/// task (filtering) and the receive task (join/leave).
type Rooms = Arc<RwLock<HashSet<Uuid>>>;

/// Everything a command handler needs about the connection it runs on.
struct ConnectionContext {
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
    rooms: Rooms,
}

/// Handle a pre-authenticated WebSocket connection. The JWT was already
/// validated at the HTTP upgrade layer, so the loop starts with the
/// `connect` acknowledgement.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ack = ServerEvent::Connect {
        user_id,
        username: username.clone(),
    };
    if !send_event(&mut sender, &ack).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id, username).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    // Register per-user channel and send existing online users, then go online
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    for (uid, uname) in dispatcher.online_users().await {
        let event = ServerEvent::UserOnline {
            user_id: uid,
            username: uname,
        };
        if !send_event(&mut sender, &event).await {
            dispatcher.unregister_user_channel(user_id, conn_id).await;
            return;
        }
    }

    // Subscribe before announcing ourselves so our own presence is observed
    let mut broadcast_rx = dispatcher.subscribe();
    dispatcher.user_online(user_id, username.clone()).await;

    let rooms: Rooms = Arc::new(RwLock::new(HashSet::new()));
    let send_rooms = rooms.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let wanted = match send_rooms.read() {
                        Ok(rooms) => msg.is_for(user_id, &rooms),
                        Err(_) => break,
                    };
                    if !wanted {
                        continue;
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let ctx = ConnectionContext {
        dispatcher: dispatcher.clone(),
        db,
        user_id,
        username: username.clone(),
        rooms,
    };
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&ctx, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            ctx.username,
                            ctx.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        ctx.dispatcher
                            .send_to_user(ctx.user_id, ServerEvent::Error {
                                message: format!("bad command: {}", e),
                                conversation_id: None,
                            })
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Serializes and sends one event. Returns false if the socket is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.name(), e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn handle_command(ctx: &ConnectionContext, cmd: ClientCommand) {
    debug!("{} ({}) -> {}", ctx.username, ctx.user_id, cmd.name());

    match cmd {
        ClientCommand::JoinRoom { conversation_id } => join_room(ctx, conversation_id).await,
        ClientCommand::JoinGroup { group_id } => join_room(ctx, group_id).await,

        ClientCommand::LeaveRoom { conversation_id } => leave_room(ctx, conversation_id),
        ClientCommand::LeaveGroup { group_id } => leave_room(ctx, group_id),

        ClientCommand::Typing { conversation_id } => {
            if in_room(ctx, conversation_id) {
                ctx.dispatcher.broadcast(ServerEvent::Typing {
                    conversation_id,
                    user_id: ctx.user_id,
                    username: ctx.username.clone(),
                });
            }
        }

        ClientCommand::StopTyping { conversation_id } => {
            if in_room(ctx, conversation_id) {
                ctx.dispatcher.broadcast(ServerEvent::StopTyping {
                    conversation_id,
                    user_id: ctx.user_id,
                });
            }
        }

        ClientCommand::SendMessage {
            client_id,
            conversation_id,
            text,
            media,
        } => {
            let new_message = NewMessage {
                conversation_id,
                sender_id: ctx.user_id,
                text,
                media,
            };
            let db = ctx.db.clone();
            let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
                let outcome = db.insert_message(&new_message)?;
                let members = match &outcome {
                    MessageSendOutcome::Sent(message) => db.conversation_members(message.conversation_id)?,
                    _ => Vec::new(),
                };
                Ok((outcome, members))
            })
            .await;

            let failure = match outcome {
                Ok(Ok((MessageSendOutcome::Sent(message), members))) => {
                    ctx.dispatcher
                        .send_to_user(
                            ctx.user_id,
                            ServerEvent::MessageSent {
                                client_id,
                                message: message.clone(),
                            },
                        )
                        .await;
                    ctx.dispatcher
                        .broadcast_to_members(ServerEvent::ReceiveMessage { message }, members);
                    return;
                }
                Ok(Ok((MessageSendOutcome::Empty, _))) => "message is empty".to_string(),
                Ok(Ok((MessageSendOutcome::NotMember, _))) => "not a member of this conversation".to_string(),
                Ok(Err(e)) => {
                    error!("Failed to store message from {}: {}", ctx.user_id, e);
                    "message could not be stored".to_string()
                }
                Err(e) => {
                    error!("spawn_blocking join error: {}", e);
                    "message could not be stored".to_string()
                }
            };

            ctx.dispatcher
                .send_to_user(
                    ctx.user_id,
                    ServerEvent::MessageFailed {
                        client_id,
                        reason: failure,
                    },
                )
                .await;
        }

        ClientCommand::MarkAsRead { conversation_id } => {
            let db = ctx.db.clone();
            let user_id = ctx.user_id;
            let marked = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
                match db.mark_read(user_id, conversation_id)? {
                    Some(read_at) => Ok(Some((read_at, db.conversation_members(conversation_id)?))),
                    None => Ok(None),
                }
            })
            .await;
            match marked {
                Ok(Ok(Some((read_at, members)))) => {
                    ctx.dispatcher.broadcast_to_members(
                        ServerEvent::MessagesRead {
                            conversation_id,
                            reader_id: user_id,
                            read_at,
                        },
                        members,
                    );
                }
                Ok(Ok(None)) => {
                    refuse(ctx, conversation_id, "not a member of this conversation").await;
                }
                Ok(Err(e)) => error!("Failed to mark {} read for {}: {}", conversation_id, user_id, e),
                Err(e) => error!("spawn_blocking join error: {}", e),
            }
        }
    }
}

async fn join_room(ctx: &ConnectionContext, conversation_id: Uuid) {
    if in_room(ctx, conversation_id) {
        return;
    }

    let db = ctx.db.clone();
    let user_id = ctx.user_id;
    let member = match tokio::task::spawn_blocking(move || db.is_member(user_id, conversation_id)).await {
        Ok(Ok(member)) => member,
        Ok(Err(e)) => {
            error!("Membership check failed for {}: {}", user_id, e);
            false
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            false
        }
    };

    if !member {
        refuse(ctx, conversation_id, "not a member of this conversation").await;
        return;
    }

    if let Ok(mut rooms) = ctx.rooms.write() {
        rooms.insert(conversation_id);
    }
    info!("{} ({}) joined room {}", ctx.username, ctx.user_id, conversation_id);
}

fn leave_room(ctx: &ConnectionContext, conversation_id: Uuid) {
    let left = ctx
        .rooms
        .write()
        .map(|mut rooms| rooms.remove(&conversation_id))
        .unwrap_or(false);
    if left {
        info!("{} ({}) left room {}", ctx.username, ctx.user_id, conversation_id);
    }
}

fn in_room(ctx: &ConnectionContext, conversation_id: Uuid) -> bool {
    ctx.rooms
        .read()
        .map(|rooms| rooms.contains(&conversation_id))
        .unwrap_or(false)
}

async fn refuse(ctx: &ConnectionContext, conversation_id: Uuid, reason: &str) {
    ctx.dispatcher
        .send_to_user(
            ctx.user_id,
            ServerEvent::Error {
                message: reason.to_string(),
                conversation_id: Some(conversation_id),
            },
        )
        .await;
}
