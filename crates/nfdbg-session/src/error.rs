use std::time::Duration;

use nfdbg_transport::ConnectResult;

/// Errors that can occur in session and device operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live transport: the device was never connected or the session ended.
    #[error("device not connected")]
    NotConnected,

    /// Opening the transport failed.
    #[error("connect failed: {0}")]
    ConnectFailed(ConnectResult),

    /// No reply arrived before the request's deadline. The session stays up.
    #[error("request {command:#010x} (seq {sequence}) timed out after {after:?}")]
    Timeout {
        command: u32,
        sequence: u16,
        after: Duration,
    },

    /// The session was torn down while the request was outstanding.
    #[error("session disconnected")]
    Disconnected,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] nfdbg_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] nfdbg_frame::FrameError),

    /// A reply payload could not be decoded.
    #[error("malformed reply: {0}")]
    Payload(#[from] nfdbg_frame::PayloadError),

    /// The device answered, but not in a way this client can use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON configuration error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// True for errors after which the same request may succeed if resent.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
