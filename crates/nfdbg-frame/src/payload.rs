//! Little-endian field reader/writer for command payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Errors from decoding a command payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// The payload ended before a field was complete.
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string field is not valid UTF-8.
    #[error("payload string is not valid UTF-8")]
    InvalidUtf8,
}

/// Cursor over a reply payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, needed: usize) -> Result<(), PayloadError> {
        if self.buf.len() < needed {
            return Err(PayloadError::Truncated {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, PayloadError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, PayloadError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, PayloadError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, PayloadError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PayloadError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// A `u16` length followed by that many UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String, PayloadError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| PayloadError::InvalidUtf8)
    }
}

/// Builder for request payloads.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// Strings longer than `u16::MAX` bytes are truncated at a char boundary.
    pub fn write_string(&mut self, v: &str) -> &mut Self {
        let mut end = v.len().min(u16::MAX as usize);
        while !v.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.put_u16_le(end as u16);
        self.buf.put_slice(&v.as_bytes()[..end]);
        self
    }

    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_what_was_written() {
        let payload = PayloadWriter::new()
            .write_u8(7)
            .write_u16(0x1234)
            .write_u32(0xDEAD_BEEF)
            .write_u64(u64::MAX - 1)
            .write_string("nanoCLR")
            .finish();

        let mut r = PayloadReader::new(&payload);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.read_string().unwrap(), "nanoCLR");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_field_reports_sizes() {
        let mut r = PayloadReader::new(&[1, 2, 3]);
        assert_eq!(
            r.read_u32(),
            Err(PayloadError::Truncated {
                needed: 4,
                remaining: 3
            })
        );
        // Failed reads consume nothing.
        assert_eq!(r.remaining(), 3);
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut r = PayloadReader::new(&[2, 0, 0xFF, 0xFE]);
        assert_eq!(r.read_string(), Err(PayloadError::InvalidUtf8));
    }
}
