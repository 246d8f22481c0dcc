use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stride_types::events::{ClientCommand, ServerEvent};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    /// Terminal; reached through logout only.
    Closed,
}

/// What the reader task hands to the client, in arrival order.
#[derive(Debug)]
pub enum Inbound {
    Event(ServerEvent),
    /// The transport closed without a local `disconnect`.
    Closed { error: Option<String> },
}

struct Live {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<ClientCommand>,
}

/// Owns the single gateway connection of a session.
pub struct ConnectionManager {
    url: String,
    state: Arc<watch::Sender<ConnectionState>>,
    live: Mutex<Option<Live>>,
    last_error: Mutex<Option<String>>,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            url: url.into(),
            state: Arc::new(state),
            live: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Last transport error, for display.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    /// Opens the gateway connection. Without a credential nothing happens and
    /// `Ok(None)` is returned. On success the returned receiver yields inbound
    /// events; the state becomes `Connected` when the server acknowledges.
    pub async fn connect(
        &self,
        credential: Option<&str>,
    ) -> Result<Option<mpsc::UnboundedReceiver<Inbound>>, ClientError> {
        let Some(token) = credential.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        if self.state() == ConnectionState::Closed {
            return Err(ClientError::Closed);
        }

        // One live connection per session
        self.teardown();
        self.state.send_replace(ConnectionState::Connecting);
        *lock(&self.last_error) = None;

        let stream = match self.open(token).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Gateway connection failed: {}", e);
                *lock(&self.last_error) = Some(e.to_string());
                self.state.send_if_modified(|s| {
                    let changed = *s == ConnectionState::Connecting;
                    if changed {
                        *s = ConnectionState::Disconnected;
                    }
                    changed
                });
                return Err(e);
            }
        };

        let (mut ws_tx, mut ws_rx) = stream.split();
        let cancel = CancellationToken::new();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientCommand>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        // Writer: drain the outbound queue
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                    cmd = out_rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        let text = match serde_json::to_string(&cmd) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to serialize {} command: {}", cmd.name(), e);
                                continue;
                            }
                        };
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            writer_cancel.cancel();
                            break;
                        }
                    }
                }
            }
        });

        // Reader: apply frames in arrival order
        let reader_cancel = cancel.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut error = None;
            loop {
                let frame = tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    frame = ws_rx.next() => frame,
                };
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if matches!(event, ServerEvent::Connect { .. }) {
                                state.send_if_modified(|s| {
                                    let changed = *s == ConnectionState::Connecting;
                                    if changed {
                                        *s = ConnectionState::Connected;
                                    }
                                    changed
                                });
                            }
                            if in_tx.send(Inbound::Event(event)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Unreadable gateway event: {}", e),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!("Gateway closed the connection: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error = Some(e.to_string());
                        break;
                    }
                    None => break,
                }
            }

            if reader_cancel.is_cancelled() {
                // Local disconnect already updated the state
                return;
            }
            reader_cancel.cancel();
            state.send_if_modified(|s| {
                let changed = matches!(s, ConnectionState::Connecting | ConnectionState::Connected);
                if changed {
                    *s = ConnectionState::Disconnected;
                }
                changed
            });
            let _ = in_tx.send(Inbound::Closed { error });
        });

        *lock(&self.live) = Some(Live {
            cancel,
            outbound: out_tx,
        });
        Ok(Some(in_rx))
    }

    async fn open(
        &self,
        token: &str,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        ClientError,
    > {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ClientError::AuthRejected)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _) = connect_async(request).await?;
        info!("Gateway connection opened to {}", self.url);
        Ok(stream)
    }

    /// Sends a command if connected. Returns false, without queueing, when
    /// it was not sent.
    pub fn emit(&self, command: ClientCommand) -> bool {
        if self.state() != ConnectionState::Connected {
            debug!("Dropping {} while {:?}", command.name(), self.state());
            return false;
        }
        match lock(&self.live).as_ref() {
            Some(live) if !live.cancel.is_cancelled() => live.outbound.send(command).is_ok(),
            _ => false,
        }
    }

    /// Releases the connection. Safe to call in any state.
    pub fn disconnect(&self) {
        self.teardown();
        self.state.send_if_modified(|s| {
            let changed = matches!(s, ConnectionState::Connecting | ConnectionState::Connected);
            if changed {
                *s = ConnectionState::Disconnected;
            }
            changed
        });
    }

    /// Disconnects for good. Later `connect` calls fail with
    /// [`ClientError::Closed`].
    pub fn close(&self) {
        self.teardown();
        self.state.send_replace(ConnectionState::Closed);
    }

    fn teardown(&self) {
        if let Some(live) = lock(&self.live).take() {
            live.cancel.cancel();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
