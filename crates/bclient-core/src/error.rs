use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("call `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("connection lost while call was pending")]
    ConnectionLost,

    #[error("outbound queue overflow; call dropped")]
    QueueOverflow,

    #[error("call cancelled")]
    Cancelled,

    #[error("socket authentication rejected: {0}")]
    AuthError(String),

    #[error("server error: {message}")]
    Remote { message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("socket channel is closed")]
    Closed,
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl ClientError {
    /// Errors that only mean "the socket went away": safe for the caller to
    /// retry once the channel is ready again.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ConnectionLost | Self::QueueOverflow | Self::Closed
        )
    }
}
