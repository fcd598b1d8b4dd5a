use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame signature that opens every packet.
pub const SIGNATURE: [u8; 8] = *b"MSdbgV1\0";

/// Frame header: signature (8) + command (4) + sequence (2) + length (4) = 18 bytes.
pub const HEADER_SIZE: usize = 18;

/// Checksum trailer size.
pub const TRAILER_SIZE: usize = 4;

/// Default maximum payload size: 64 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command code.
    pub command: u32,
    /// Sequence number assigned by the sender.
    pub sequence: u16,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(command: u32, sequence: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            sequence,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload + checksum).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }

    /// Encode this frame, appending to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_frame(self.command, self.sequence, &self.payload, dst)
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (integers little-endian):
/// ```text
/// ┌────────────────┬──────────┬──────────┬──────────┬──────────────┬──────────┐
/// │ Signature (8B) │ Command  │ Sequence │ Length   │ Payload      │ CRC-32C  │
/// │ "MSdbgV1\0"    │ (4B)     │ (2B)     │ (4B)     │ (Length B)   │ (4B)     │
/// └────────────────┴──────────┴──────────┴──────────┴──────────────┴──────────┘
/// ```
/// The checksum covers everything before it.
pub fn encode_frame(command: u32, sequence: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    let start = dst.len();
    dst.reserve(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    dst.put_slice(&SIGNATURE);
    dst.put_u32_le(command);
    dst.put_u16_le(sequence);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    let checksum = crc32c::crc32c(&dst[start..]);
    dst.put_u32_le(checksum);
    Ok(())
}

/// Validate the frame at the head of `src` without consuming anything.
///
/// Returns its total wire size once header, payload and trailer are all
/// present and the checksum matches, or `Ok(None)` while bytes are missing.
pub fn frame_len(src: &[u8], max_payload: usize) -> Result<Option<usize>> {
    let probe = src.len().min(SIGNATURE.len());
    if src[..probe] != SIGNATURE[..probe] {
        return Err(FrameError::InvalidSignature);
    }
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let payload_len = (&src[HEADER_SIZE - 4..HEADER_SIZE]).get_u32_le() as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let body_end = HEADER_SIZE + payload_len;
    if src.len() < body_end + TRAILER_SIZE {
        return Ok(None); // Need more data
    }

    let expected = (&src[body_end..body_end + TRAILER_SIZE]).get_u32_le();
    let computed = crc32c::crc32c(&src[..body_end]);
    if expected != computed {
        return Err(FrameError::ChecksumMismatch { expected, computed });
    }
    Ok(Some(body_end + TRAILER_SIZE))
}

/// Decode a frame from the head of a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. On error nothing is
/// consumed; the caller decides how to skip the corruption.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(wire_len) = frame_len(src, max_payload)? else {
        return Ok(None);
    };

    let mut header = &src[SIGNATURE.len()..HEADER_SIZE];
    let command = header.get_u32_le();
    let sequence = header.get_u16_le();

    src.advance(HEADER_SIZE);
    let payload = src.split_to(wire_len - HEADER_SIZE - TRAILER_SIZE).freeze();
    src.advance(TRAILER_SIZE);

    Ok(Some(Frame {
        command,
        sequence,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 64 KiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = b"hello, device!";

        encode_frame(0x0002_0040, 7, payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len() + TRAILER_SIZE);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();

        assert_eq!(frame.command, 0x0002_0040);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_wire_layout_is_bit_exact() {
        let mut buf = BytesMut::new();
        encode_frame(0x01, 5, &[0xDE, 0xAD, 0xBE, 0xEF], &mut buf).unwrap();

        assert_eq!(&buf[..8], b"MSdbgV1\0");
        assert_eq!(&buf[8..12], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&buf[12..14], &[0x05, 0x00]);
        assert_eq!(&buf[14..18], &[0x04, 0x00, 0x00, 0x00]);
        assert_eq!(&buf[18..22], &[0xDE, 0xAD, 0xBE, 0xEF]);
        let crc = crc32c::crc32c(&buf[..22]);
        assert_eq!(&buf[22..26], &crc.to_le_bytes());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&b"MSdbgV1\0\x01\x00"[..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_decode_partial_signature_waits() {
        let mut buf = BytesMut::from(&b"MSdb"[..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(1, 1, b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_frame_len_does_not_consume() {
        let mut buf = BytesMut::new();
        encode_frame(3, 9, b"peek", &mut buf).unwrap();
        let total = buf.len();

        assert_eq!(frame_len(&buf, DEFAULT_MAX_PAYLOAD).unwrap(), Some(total));
        assert_eq!(frame_len(&buf[..total - 1], DEFAULT_MAX_PAYLOAD).unwrap(), None);
        assert_eq!(buf.len(), total);
    }

    #[test]
    fn test_decode_invalid_signature() {
        let mut buf = BytesMut::from(&[0xFF; HEADER_SIZE][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidSignature)));
        assert_eq!(buf.len(), HEADER_SIZE, "errors must not consume input");
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut buf = BytesMut::new();
        encode_frame(1, 2, b"payload", &mut buf).unwrap();
        buf[HEADER_SIZE] ^= 0xFF;

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&SIGNATURE);
        buf.put_u32_le(1);
        buf.put_u16_le(1);
        buf.put_u32_le(1024 * 1024);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(1, 10, b"first", &mut buf).unwrap();
        encode_frame(2, 11, b"second", &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!((f1.command, f1.sequence), (1, 10));
        assert_eq!(f1.payload.as_ref(), b"first");

        let f2 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!((f2.command, f2.sequence), (2, 11));
        assert_eq!(f2.payload.as_ref(), b"second");

        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(0, 0, b"", &mut buf).unwrap();

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.command, 0);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(1, 3, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4 + TRAILER_SIZE);

        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), frame.wire_size());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn decode_inverts_encode(
                command in any::<u32>(),
                sequence in any::<u16>(),
                payload in proptest::collection::vec(any::<u8>(), 0..2048),
            ) {
                let mut buf = BytesMut::new();
                encode_frame(command, sequence, &payload, &mut buf).unwrap();

                let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
                prop_assert_eq!(frame.command, command);
                prop_assert_eq!(frame.sequence, sequence);
                prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
                prop_assert!(buf.is_empty());
            }
        }
    }
}
