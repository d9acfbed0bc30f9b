use byteorder::{BigEndian, ByteOrder};
use common::err::CoreError;
use uuid::Uuid;

/// Accumulates bytes read off the wire and exposes a cursor-based reader
/// over the payload of the currently framed message.
///
/// Usage: `feed` appends freshly-read bytes, `take_message` returns `true`
/// once a complete `(tag, length, payload)` frame is buffered and parks the
/// cursor at the start of the payload, the `read_*` methods advance that
/// cursor, and `finish_message` both validates that the whole payload was
/// consumed and discards the frame's bytes from the front of the buffer.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buf: Vec<u8>,
    /// Byte offset in `buf` where the current payload starts, once a
    /// message has been taken.
    payload_start: usize,
    /// Byte offset in `buf` where the current payload ends (exclusive).
    payload_end: usize,
    /// Read cursor within `[payload_start, payload_end)`.
    cursor: usize,
    tag: Option<u8>,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly-received bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the message tag of the frame currently parked by
    /// `take_message`, if any.
    pub fn tag(&self) -> Option<u8> {
        self.tag
    }

    /// Returns true iff a full frame is buffered; idempotent — calling it
    /// again before `finish_message` re-reports the same frame.
    pub fn take_message(&mut self) -> bool {
        if self.tag.is_some() {
            return true;
        }
        if self.buf.len() < crate::FRAME_HEADER_SIZE {
            return false;
        }
        let tag = self.buf[0];
        let declared_len = BigEndian::read_u32(&self.buf[1..5]) as usize;
        // declared_len includes itself (4 bytes) but not the tag byte.
        let total_frame_len = 1 + declared_len;
        if self.buf.len() < total_frame_len {
            return false;
        }
        self.tag = Some(tag);
        self.payload_start = crate::FRAME_HEADER_SIZE;
        self.payload_end = total_frame_len;
        self.cursor = self.payload_start;
        true
    }

    fn remaining(&self) -> usize {
        self.payload_end.saturating_sub(self.cursor)
    }

    fn take(&mut self, n: usize) -> Result<&[u8], CoreError> {
        if self.remaining() < n {
            return Err(CoreError::ProtocolError(format!(
                "unexpected end of message: needed {n} bytes, had {}",
                self.remaining()
            )));
        }
        let start = self.cursor;
        self.cursor += n;
        Ok(&self.buf[start..start + n])
    }

    pub fn read_byte(&mut self) -> Result<u8, CoreError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_int16(&mut self) -> Result<i16, CoreError> {
        Ok(BigEndian::read_i16(self.take(2)?))
    }

    pub fn read_uint16(&mut self) -> Result<u16, CoreError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_int32(&mut self) -> Result<i32, CoreError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn read_uint32(&mut self) -> Result<u32, CoreError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_int64(&mut self) -> Result<i64, CoreError> {
        Ok(BigEndian::read_i64(self.take(8)?))
    }

    pub fn read_uint64(&mut self) -> Result<u64, CoreError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CoreError> {
        Ok(self.take(n)?.to_vec())
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, CoreError> {
        let bytes = self.take(16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(arr))
    }

    /// `u32 length, bytes` — `lp_bytes` in the wire format glossary.
    pub fn read_len_prefixed_bytes(&mut self) -> Result<Vec<u8>, CoreError> {
        let len = self.read_uint32()? as usize;
        self.read_bytes(len)
    }

    /// `u32 length, utf8 bytes` — `lp_utf8`.
    pub fn read_len_prefixed_utf8(&mut self) -> Result<String, CoreError> {
        let bytes = self.read_len_prefixed_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| CoreError::ProtocolError(format!("invalid utf-8 string: {e}")))
    }

    /// Finishes the currently-parked message: errors if the payload cursor
    /// did not land exactly on the declared length, then discards the
    /// frame's bytes and clears the parked state so the next
    /// `take_message` call can proceed.
    pub fn finish_message(&mut self) -> Result<(), CoreError> {
        if self.tag.is_none() {
            return Err(CoreError::ProtocolError(
                "finish_message called with no message taken".to_string(),
            ));
        }
        if self.cursor != self.payload_end {
            return Err(CoreError::ProtocolError("unparsed data".to_string()));
        }
        self.buf.drain(0..self.payload_end);
        self.payload_start = 0;
        self.payload_end = 0;
        self.cursor = 0;
        self.tag = None;
        Ok(())
    }
}
