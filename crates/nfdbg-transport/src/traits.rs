use std::fmt;
use std::io::ErrorKind;

use bytes::Bytes;

use crate::error::Result;

/// Outcome of opening a transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectResult {
    /// A live stream is open.
    Connected,
    /// The endpoint could not be opened and no error explains why.
    NotConnected,
    /// Access to the endpoint was denied. Retrying will not help.
    Unauthorized,
    /// Opening failed with an error other than an access denial.
    ExceptionOccurred,
}

impl ConnectResult {
    /// True only for [`ConnectResult::Connected`].
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectResult::Connected)
    }

    /// True when a later attempt may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ConnectResult::NotConnected | ConnectResult::ExceptionOccurred
        )
    }

    /// Map a failure from opening the OS stream to a connect result.
    pub fn from_open_error(err: &std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::PermissionDenied => ConnectResult::Unauthorized,
            _ => ConnectResult::ExceptionOccurred,
        }
    }
}

impl fmt::Display for ConnectResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectResult::Connected => "connected",
            ConnectResult::NotConnected => "not connected",
            ConnectResult::Unauthorized => "unauthorized",
            ConnectResult::ExceptionOccurred => "exception occurred",
        };
        f.write_str(name)
    }
}

/// Result of a single [`Transport::read`].
///
/// A timeout is not an error: an idle device simply has nothing to say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One or more bytes arrived. Never empty.
    Data(Bytes),
    /// The read timeout elapsed with no data on a live stream.
    TimedOut,
    /// The far end closed the stream.
    Closed,
}

/// A byte-stream endpoint to a device.
///
/// Methods take `&self` so that one thread can block in [`read`](Self::read)
/// while another calls [`send`](Self::send); implementations keep the stream
/// behind interior locking and never hold a lock across a blocking read.
pub trait Transport: Send + Sync {
    /// Identity of the endpoint (TCP port id, serial device path, ...).
    fn instance_id(&self) -> &str;

    /// Open the underlying stream. Returns `Connected` without reopening when
    /// a stream is already live.
    fn connect(&self) -> ConnectResult;

    /// Close and release the stream. With `force`, the owning registry is
    /// also asked to forget this instance id.
    fn disconnect(&self, force: bool);

    /// Whether a live stream is currently held.
    fn is_connected(&self) -> bool;

    /// Write the whole buffer. Fails with `NotConnected` when no stream is open.
    fn send(&self, buffer: &[u8]) -> Result<usize>;

    /// Read up to `max_bytes`, waiting at most the configured read timeout.
    fn read(&self, max_bytes: usize) -> Result<ReadOutcome>;

    /// Bytes ready to read without blocking, or `-1` when not connected.
    fn available_bytes(&self) -> i64;
}

/// The part of a device manager the transport layer talks to.
pub trait DeviceRegistry: Send + Sync {
    /// Drop all bookkeeping kept for `instance_id`.
    fn dispose_device(&self, instance_id: &str);
}

/// Whether an I/O error is the stream's read timeout firing.
pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Whether an I/O error means the stream is gone for good.
pub(crate) fn is_fatal(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_is_unauthorized() {
        let err = std::io::Error::from(ErrorKind::PermissionDenied);
        assert_eq!(
            ConnectResult::from_open_error(&err),
            ConnectResult::Unauthorized
        );
        assert!(!ConnectResult::Unauthorized.is_retryable());
    }

    #[test]
    fn other_open_failures_are_exceptions() {
        let err = std::io::Error::from(ErrorKind::ConnectionRefused);
        let result = ConnectResult::from_open_error(&err);
        assert_eq!(result, ConnectResult::ExceptionOccurred);
        assert!(result.is_retryable());
        assert_ne!(result, ConnectResult::NotConnected);
    }

    #[test]
    fn timeout_kinds_detected() {
        assert!(is_timeout(&std::io::Error::from(ErrorKind::WouldBlock)));
        assert!(is_timeout(&std::io::Error::from(ErrorKind::TimedOut)));
        assert!(!is_timeout(&std::io::Error::from(ErrorKind::BrokenPipe)));
    }
}
