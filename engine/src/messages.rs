//! Client request payloads and the server response frames the dispatch
//! loop writes back, built directly on `protocol`'s framed reader/writer.

use common::err::CResult;
use protocol::headers::Headers;
use protocol::tags::server;
use protocol::{ReadBuffer, WriteBuffer};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub headers: Headers,
    pub output_format: u8,
    pub expect_one: bool,
    pub implicit_limit: u64,
    pub command_text: String,
}

impl ParseMessage {
    pub fn read(rb: &mut ReadBuffer) -> CResult<Self> {
        let headers = Headers::parse(rb)?;
        let output_format = rb.read_byte()?;
        let expect_one = rb.read_byte()? != 0;
        let implicit_limit = rb.read_uint64()?;
        let command_text = rb.read_len_prefixed_utf8()?;
        Ok(ParseMessage {
            headers,
            output_format,
            expect_one,
            implicit_limit,
            command_text,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DescribeMessage {
    pub aspect: u8,
}

impl DescribeMessage {
    pub fn read(rb: &mut ReadBuffer) -> CResult<Self> {
        let _headers = Headers::parse(rb)?;
        let aspect = rb.read_byte()?;
        Ok(DescribeMessage { aspect })
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub headers: Headers,
    pub output_format: u8,
    pub expect_one: bool,
    pub implicit_limit: u64,
    pub command_text: String,
    pub in_tid: Uuid,
    pub out_tid: Uuid,
    pub arguments: Vec<u8>,
}

impl ExecuteMessage {
    pub fn read(rb: &mut ReadBuffer) -> CResult<Self> {
        let headers = Headers::parse(rb)?;
        let output_format = rb.read_byte()?;
        let expect_one = rb.read_byte()? != 0;
        let implicit_limit = rb.read_uint64()?;
        let command_text = rb.read_len_prefixed_utf8()?;
        let in_tid = rb.read_uuid()?;
        let out_tid = rb.read_uuid()?;
        let arguments = rb.read_len_prefixed_bytes()?;
        Ok(ExecuteMessage {
            headers,
            output_format,
            expect_one,
            implicit_limit,
            command_text,
            in_tid,
            out_tid,
            arguments,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FastQueryMessage {
    pub command_text: String,
    pub bind_args: Vec<u8>,
}

impl FastQueryMessage {
    pub fn read(rb: &mut ReadBuffer) -> CResult<Self> {
        let command_text = rb.read_len_prefixed_utf8()?;
        let bind_args = rb.read_len_prefixed_bytes()?;
        Ok(FastQueryMessage { command_text, bind_args })
    }
}

#[derive(Debug, Clone)]
pub struct SimpleQueryMessage {
    pub script: String,
}

impl SimpleQueryMessage {
    pub fn read(rb: &mut ReadBuffer) -> CResult<Self> {
        let script = rb.read_len_prefixed_utf8()?;
        Ok(SimpleQueryMessage { script })
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeMessage {
    pub major: u16,
    pub minor: u16,
    pub user: String,
    pub database: String,
    pub credential: Vec<u8>,
    /// Legacy (≤ `(0,14)`) handshakes carry an extensions block the
    /// current protocol no longer defines; parsed and discarded.
    pub legacy_extensions: Vec<u8>,
}

impl HandshakeMessage {
    /// `is_legacy` is evaluated against the major/minor just read off the
    /// wire — legacy (≤ `(0,14)`) handshakes carry a trailing extensions
    /// block the current protocol no longer defines.
    pub fn read(rb: &mut ReadBuffer, is_legacy: impl Fn(u16, u16) -> bool) -> CResult<Self> {
        let major = rb.read_uint16()?;
        let minor = rb.read_uint16()?;
        let user = rb.read_len_prefixed_utf8()?;
        let database = rb.read_len_prefixed_utf8()?;
        let credential = rb.read_len_prefixed_bytes()?;
        let legacy_extensions = if is_legacy(major, minor) {
            rb.read_len_prefixed_bytes()?
        } else {
            Vec::new()
        };
        Ok(HandshakeMessage {
            major,
            minor,
            user,
            database,
            credential,
            legacy_extensions,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RestoreMessage {
    pub headers: Headers,
    pub header_data: Vec<u8>,
}

impl RestoreMessage {
    pub fn read(rb: &mut ReadBuffer) -> CResult<Self> {
        let headers = Headers::parse(rb)?;
        let header_data = rb.read_len_prefixed_bytes()?;
        Ok(RestoreMessage { headers, header_data })
    }
}

pub fn write_error_response(wb: &mut WriteBuffer, code: &str, message: &str) -> CResult<()> {
    wb.new_message(server::ERROR_RESPONSE)?;
    wb.write_len_prefixed_utf8(code);
    wb.write_len_prefixed_utf8(message);
    wb.end_message()?;
    Ok(())
}

pub fn write_ready_for_query(wb: &mut WriteBuffer, transaction_state: u8) -> CResult<()> {
    wb.new_message(server::READY_FOR_QUERY)?;
    wb.write_byte(transaction_state);
    wb.end_message()?;
    Ok(())
}

pub fn write_parse_complete(wb: &mut WriteBuffer, in_tid: Uuid, out_tid: Uuid) -> CResult<()> {
    wb.new_message(server::PARSE_COMPLETE)?;
    wb.write_uuid(&in_tid);
    wb.write_uuid(&out_tid);
    wb.end_message()?;
    Ok(())
}

pub fn write_command_data_description(
    wb: &mut WriteBuffer,
    in_tid: Uuid,
    in_data: &[u8],
    out_tid: Uuid,
    out_data: &[u8],
) -> CResult<()> {
    wb.new_message(server::COMMAND_DATA_DESCRIPTION)?;
    wb.write_uuid(&in_tid);
    wb.write_len_prefixed_bytes(in_data);
    wb.write_uuid(&out_tid);
    wb.write_len_prefixed_bytes(out_data);
    wb.end_message()?;
    Ok(())
}

pub fn write_command_complete(wb: &mut WriteBuffer, status: &str) -> CResult<()> {
    wb.new_message(server::COMMAND_COMPLETE)?;
    wb.write_len_prefixed_utf8(status);
    wb.end_message()?;
    Ok(())
}

pub fn write_authentication_ok(wb: &mut WriteBuffer) -> CResult<()> {
    wb.new_message(server::AUTHENTICATION)?;
    wb.write_uint32(0);
    wb.end_message()?;
    Ok(())
}

/// §4.5 step 2: `BackendKeyData` carries 32 zero bytes at this layer —
/// cancellation-key semantics belong to a collaborator out of scope here.
pub fn write_backend_key_data(wb: &mut WriteBuffer) -> CResult<()> {
    wb.new_message(server::BACKEND_KEY_DATA)?;
    wb.write_bytes(&[0u8; 32]);
    wb.end_message()?;
    Ok(())
}

pub fn write_parameter_status(wb: &mut WriteBuffer, name: &str, value: &str) -> CResult<()> {
    wb.new_message(server::PARAMETER_STATUS)?;
    wb.write_len_prefixed_utf8(name);
    wb.write_len_prefixed_utf8(value);
    wb.end_message()?;
    Ok(())
}

pub fn write_negotiate_protocol_version(wb: &mut WriteBuffer, major: u16, minor: u16) -> CResult<()> {
    wb.new_message(server::NEGOTIATE_PROTOCOL_VERSION)?;
    wb.write_uint16(major);
    wb.write_uint16(minor);
    wb.end_message()?;
    Ok(())
}
