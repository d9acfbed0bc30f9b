//! The 16-bit-keyed, length-prefixed headers block shared by several
//! client messages: `nfields:u16` then `(key:u16, value:lp_bytes)×nfields`.

use std::collections::BTreeMap;

use common::err::CoreError;

use crate::{ReadBuffer, WriteBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HeaderKey {
    ImplicitLimit,
    ImplicitTypeids,
    ImplicitTypenames,
    AllowCapabilities,
    ExplicitObjectids,
    ExplicitModule,
    ProhibitMutation,
}

impl HeaderKey {
    const IMPLICIT_LIMIT: u16 = 0xFF01;
    const IMPLICIT_TYPEIDS: u16 = 0xFF02;
    const IMPLICIT_TYPENAMES: u16 = 0xFF03;
    const ALLOW_CAPABILITIES: u16 = 0xFF04;
    const EXPLICIT_OBJECTIDS: u16 = 0xFF05;
    const EXPLICIT_MODULE: u16 = 0xFF06;
    const PROHIBIT_MUTATION: u16 = 0xFF07;

    fn from_wire(key: u16) -> Result<Self, CoreError> {
        Ok(match key {
            Self::IMPLICIT_LIMIT => HeaderKey::ImplicitLimit,
            Self::IMPLICIT_TYPEIDS => HeaderKey::ImplicitTypeids,
            Self::IMPLICIT_TYPENAMES => HeaderKey::ImplicitTypenames,
            Self::ALLOW_CAPABILITIES => HeaderKey::AllowCapabilities,
            Self::EXPLICIT_OBJECTIDS => HeaderKey::ExplicitObjectids,
            Self::EXPLICIT_MODULE => HeaderKey::ExplicitModule,
            Self::PROHIBIT_MUTATION => HeaderKey::ProhibitMutation,
            other => {
                return Err(CoreError::ProtocolError(format!(
                    "unknown header key: {other:#06x}"
                )))
            }
        })
    }

    fn to_wire(self) -> u16 {
        match self {
            HeaderKey::ImplicitLimit => Self::IMPLICIT_LIMIT,
            HeaderKey::ImplicitTypeids => Self::IMPLICIT_TYPEIDS,
            HeaderKey::ImplicitTypenames => Self::IMPLICIT_TYPENAMES,
            HeaderKey::AllowCapabilities => Self::ALLOW_CAPABILITIES,
            HeaderKey::ExplicitObjectids => Self::EXPLICIT_OBJECTIDS,
            HeaderKey::ExplicitModule => Self::EXPLICIT_MODULE,
            HeaderKey::ProhibitMutation => Self::PROHIBIT_MUTATION,
        }
    }
}

/// A parsed headers block, keyed by the recognized `HeaderKey`.
#[derive(Debug, Clone, Default)]
pub struct Headers(BTreeMap<HeaderKey, Vec<u8>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: HeaderKey) -> Option<&[u8]> {
        self.0.get(&key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, key: HeaderKey, value: Vec<u8>) {
        self.0.insert(key, value);
    }

    /// Reads `nfields:u16` then `nfields` `(key, lp_bytes)` pairs. An
    /// unrecognized key is a protocol error.
    pub fn parse(rb: &mut ReadBuffer) -> Result<Self, CoreError> {
        let nfields = rb.read_uint16()?;
        let mut headers = Headers::new();
        for _ in 0..nfields {
            let key = HeaderKey::from_wire(rb.read_uint16()?)?;
            let value = rb.read_len_prefixed_bytes()?;
            headers.insert(key, value);
        }
        Ok(headers)
    }

    pub fn write(&self, wb: &mut WriteBuffer) {
        wb.write_uint16(self.0.len() as u16);
        for (key, value) in &self.0 {
            wb.write_uint16(key.to_wire());
            wb.write_len_prefixed_bytes(value);
        }
    }
}

/// `SERVER_HEADER_CAPABILITIES`: the reserved server-frame header carrying
/// a length-prefixed `u64` capability bitmask.
pub const SERVER_HEADER_CAPABILITIES: u16 = 0x1001;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_headers() {
        let mut wb = WriteBuffer::new();
        let mut headers = Headers::new();
        headers.insert(HeaderKey::ImplicitLimit, 100u64.to_be_bytes().to_vec());
        headers.write(&mut wb);

        let mut rb = ReadBuffer::new();
        rb.feed(wb.as_bytes());
        let parsed = Headers::parse(&mut rb).unwrap();
        assert_eq!(
            parsed.get(HeaderKey::ImplicitLimit),
            Some(100u64.to_be_bytes().as_slice())
        );
    }

    #[test]
    fn unknown_header_key_is_protocol_error() {
        let mut wb = WriteBuffer::new();
        wb.write_uint16(1);
        wb.write_uint16(0x0000);
        wb.write_len_prefixed_bytes(&[]);

        let mut rb = ReadBuffer::new();
        rb.feed(wb.as_bytes());
        assert!(matches!(
            Headers::parse(&mut rb),
            Err(CoreError::ProtocolError(_))
        ));
    }
}
