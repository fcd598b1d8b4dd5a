//! Checksummed wire framing for the device debug protocol.
//!
//! Every packet is framed with:
//! - An 8-byte signature (`"MSdbgV1\0"`) for stream synchronization
//! - A 4-byte little-endian command code
//! - A 2-byte little-endian sequence number
//! - A 4-byte little-endian payload length
//! - A CRC-32C trailer over header and payload
//!
//! The transport is lossy: the [`FrameDecoder`] drops corrupted input and
//! resynchronizes on the next signature instead of failing.

pub mod codec;
pub mod commands;
pub mod decoder;
pub mod error;
pub mod payload;

pub use codec::{
    decode_frame, encode_frame, frame_len, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    SIGNATURE, TRAILER_SIZE,
};
pub use commands::{command_name, is_monitor, is_unsolicited};
pub use decoder::{DecoderStats, FrameDecoder};
pub use error::{FrameError, Result};
pub use payload::{PayloadError, PayloadReader, PayloadWriter};
