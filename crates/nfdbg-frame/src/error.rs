/// Errors that can occur during frame encoding/decoding.
///
/// Only [`FrameError::PayloadTooLarge`] ever leaves this crate: the streaming
/// decoder treats the other variants as corruption and resynchronizes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The bytes at the head of the buffer are not the frame signature.
    #[error("invalid frame signature")]
    InvalidSignature,

    /// The checksum trailer does not match the header and payload.
    #[error("checksum mismatch (expected {expected:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
