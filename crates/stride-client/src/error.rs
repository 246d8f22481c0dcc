use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The gateway refused the credential. The caller should drop the session.
    #[error("authentication rejected by server")]
    AuthRejected,

    #[error("connection failed: {0}")]
    Transport(String),

    #[error("timed out waiting for the gateway handshake")]
    HandshakeTimeout,

    #[error("client is closed")]
    Closed,

    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),

    #[error("preferences I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("preferences are corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match e {
            Error::Http(response) if response.status().as_u16() == 401 => Self::AuthRejected,
            Error::Url(e) => Self::InvalidUrl(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}
