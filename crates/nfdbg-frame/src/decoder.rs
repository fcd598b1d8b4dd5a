use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::codec::{decode_frame, frame_len, Frame, FrameConfig, HEADER_SIZE, SIGNATURE};
use crate::error::FrameError;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Counters describing what the decoder had to throw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames successfully decoded.
    pub frames: u64,
    /// Bytes discarded while hunting for a signature.
    pub discarded_bytes: u64,
    /// Candidate frames rejected for a bad checksum.
    pub checksum_failures: u64,
    /// Candidate frames rejected for an oversized length field.
    pub oversized_headers: u64,
    /// Incomplete candidates abandoned because a valid frame follows inside
    /// the bytes their length field claims.
    pub stalled_headers: u64,
}

/// Incremental frame decoder.
///
/// Feed it whatever the transport returned; it keeps partial bytes between
/// calls and yields complete, checksum-verified frames. Corruption is never an
/// error: the decoder drops one byte and scans forward to the next signature.
///
/// A length field is not trusted on its own. While a candidate waits for
/// more bytes, any later signature that already decodes to a checksum-valid
/// frame marks the candidate as corrupt.
pub struct FrameDecoder {
    buf: BytesMut,
    config: FrameConfig,
    stats: DecoderStats,
    // Offset (from the buffer head) where the look-ahead scan resumes.
    lookahead_from: usize,
}

impl FrameDecoder {
    /// Create a decoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            stats: DecoderStats::default(),
            lookahead_from: 1,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append received bytes and return every frame now complete.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.push(bytes);
        self.drain()
    }

    /// Return every complete frame currently buffered, in stream order.
    pub fn drain(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match decode_frame(&mut self.buf, self.config.max_payload_size) {
                Ok(Some(frame)) => {
                    self.lookahead_from = 1;
                    self.stats.frames += 1;
                    trace!(
                        command = frame.command,
                        sequence = frame.sequence,
                        len = frame.payload.len(),
                        "decoded frame"
                    );
                    return Some(frame);
                }
                Ok(None) => match self.valid_frame_ahead() {
                    Some(offset) => self.abandon_candidate(offset),
                    None => return None,
                },
                Err(err) => self.resync(&err),
            }
        }
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decoder counters since creation or the last [`reset`](Self::reset).
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop buffered bytes and counters (e.g. after a reconnect).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.stats = DecoderStats::default();
        self.lookahead_from = 1;
    }

    /// Current decoder configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn resync(&mut self, err: &FrameError) {
        match err {
            FrameError::ChecksumMismatch { expected, computed } => {
                self.stats.checksum_failures += 1;
                warn!(expected, computed, "dropping frame with bad checksum");
            }
            FrameError::PayloadTooLarge { size, max } => {
                self.stats.oversized_headers += 1;
                warn!(size, max, "dropping frame header with oversized length");
            }
            FrameError::InvalidSignature => {}
        }

        // Drop one byte, then skip straight to the next possible signature start.
        let skip = 1 + self.buf[1..]
            .iter()
            .position(|&b| b == SIGNATURE[0])
            .unwrap_or(self.buf.len() - 1);
        self.buf.advance(skip);
        self.stats.discarded_bytes += skip as u64;
        self.lookahead_from = 1;
        trace!(skip, remaining = self.buf.len(), "resynchronizing");
    }

    /// Offset of the first later signature that starts a complete, valid frame.
    ///
    /// Positions already ruled out are not scanned again; the scan resumes at
    /// the first candidate that was still incomplete.
    fn valid_frame_ahead(&mut self) -> Option<usize> {
        // The shortest frame is longer than a header, so nothing can follow.
        if self.buf.len() <= HEADER_SIZE {
            return None;
        }
        let max = self.config.max_payload_size;
        let mut undecided = None;
        for offset in self.lookahead_from..self.buf.len() {
            if self.buf[offset] != SIGNATURE[0] {
                continue;
            }
            match frame_len(&self.buf[offset..], max) {
                Ok(Some(_)) => return Some(offset),
                Ok(None) => {
                    undecided.get_or_insert(offset);
                }
                Err(_) => {}
            }
        }
        self.lookahead_from = undecided.unwrap_or(self.buf.len());
        None
    }

    fn abandon_candidate(&mut self, offset: usize) {
        self.stats.stalled_headers += 1;
        self.stats.discarded_bytes += offset as u64;
        warn!(
            skipped = offset,
            "dropping incomplete frame; a valid frame follows inside its declared length"
        );
        self.buf.advance(offset);
        self.lookahead_from = 1;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("buffered", &self.buf.len())
            .field("stats", &self.stats)
            .finish()
    }
}
