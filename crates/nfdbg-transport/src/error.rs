/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The operation needs a live stream and there is none.
    #[error("device not connected")]
    NotConnected,

    /// The instance id does not name an endpoint this provider understands.
    #[error("invalid instance id '{0}'")]
    InvalidInstanceId(String),

    /// An I/O error occurred on the underlying stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
