use nfdbg_session::SessionError;

use crate::kind::{Handle, ValueKind};

/// Errors from resolving remote values.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The value's kind has no contents of the requested shape.
    #[error("value {handle} is a {actual}, not a {expected}")]
    KindMismatch {
        handle: Handle,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// The device's reply does not decode as the value's kind.
    #[error("malformed contents for value {handle}: {reason}")]
    Malformed { handle: Handle, reason: String },

    /// The fetch itself failed.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

impl RuntimeError {
    pub(crate) fn malformed(handle: Handle, reason: impl ToString) -> Self {
        RuntimeError::Malformed {
            handle,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
