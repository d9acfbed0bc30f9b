use byteorder::{BigEndian, WriteBytesExt};
use common::err::CoreError;
use uuid::Uuid;

/// Accumulates outgoing frames. `new_message` opens a frame by writing its
/// tag and a placeholder length, subsequent `write_*` calls append to the
/// payload, and `end_message` backpatches the declared length to match the
/// bytes written in between.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    buf: Vec<u8>,
    /// Offset of the length field of the currently-open message, if any.
    open_len_offset: Option<usize>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_message(&mut self, tag: u8) -> Result<(), CoreError> {
        if self.open_len_offset.is_some() {
            return Err(CoreError::InternalServerError(
                "new_message called while a message is already open".to_string(),
            ));
        }
        self.buf.push(tag);
        let len_offset = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]);
        self.open_len_offset = Some(len_offset);
        Ok(())
    }

    pub fn end_message(&mut self) -> Result<(), CoreError> {
        let len_offset = self.open_len_offset.take().ok_or_else(|| {
            CoreError::InternalServerError("end_message called with no open message".to_string())
        })?;
        let declared_len = (self.buf.len() - len_offset) as u32;
        BigEndian::write_u32(&mut self.buf[len_offset..len_offset + 4], declared_len);
        Ok(())
    }

    pub fn write_byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_int16(&mut self, value: i16) {
        let _ = self.buf.write_i16::<BigEndian>(value);
    }

    pub fn write_uint16(&mut self, value: u16) {
        let _ = self.buf.write_u16::<BigEndian>(value);
    }

    pub fn write_int32(&mut self, value: i32) {
        let _ = self.buf.write_i32::<BigEndian>(value);
    }

    pub fn write_uint32(&mut self, value: u32) {
        let _ = self.buf.write_u32::<BigEndian>(value);
    }

    pub fn write_int64(&mut self, value: i64) {
        let _ = self.buf.write_i64::<BigEndian>(value);
    }

    pub fn write_uint64(&mut self, value: u64) {
        let _ = self.buf.write_u64::<BigEndian>(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_uuid(&mut self, uuid: &Uuid) {
        self.buf.extend_from_slice(uuid.as_bytes());
    }

    pub fn write_len_prefixed_bytes(&mut self, bytes: &[u8]) {
        self.write_uint32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    pub fn write_len_prefixed_utf8(&mut self, s: &str) {
        self.write_len_prefixed_bytes(s.as_bytes());
    }

    /// Bytes ready to be flushed to the transport. Only meaningful between
    /// (not during) open messages.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReadBuffer;

    #[test]
    fn declared_length_includes_itself_but_not_tag() {
        let mut wb = WriteBuffer::new();
        wb.new_message(b'Z').unwrap();
        wb.write_byte(1);
        wb.write_byte(2);
        wb.end_message().unwrap();

        let bytes = wb.take();
        assert_eq!(bytes[0], b'Z');
        let declared = u32::from_be_bytes(bytes[1..5].try_into().unwrap());
        assert_eq!(declared as usize, bytes.len() - 1);
    }

    #[test]
    fn round_trips_through_read_buffer() {
        let mut wb = WriteBuffer::new();
        wb.new_message(b'T').unwrap();
        wb.write_uint16(7);
        wb.write_len_prefixed_utf8("COMMIT");
        wb.end_message().unwrap();

        let mut rb = ReadBuffer::new();
        rb.feed(&wb.take());
        assert!(rb.take_message());
        assert_eq!(rb.tag(), Some(b'T'));
        assert_eq!(rb.read_uint16().unwrap(), 7);
        assert_eq!(rb.read_len_prefixed_utf8().unwrap(), "COMMIT");
        rb.finish_message().unwrap();
    }

    #[test]
    fn end_message_without_open_errors() {
        let mut wb = WriteBuffer::new();
        assert!(wb.end_message().is_err());
    }
}
