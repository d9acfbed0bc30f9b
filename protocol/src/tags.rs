//! Message tag bytes for the binary wire protocol (§6).

pub mod client {
    pub const PARSE: u8 = b'P';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const OPTIMISTIC_EXECUTE: u8 = b'O';
    pub const FAST_QUERY: u8 = b'F';
    pub const SIMPLE_QUERY: u8 = b'Q';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
    pub const DUMP: u8 = b'>';
    pub const RESTORE: u8 = b'<';
    pub const RESTORE_BLOCK: u8 = b'=';
    pub const RESTORE_EOF: u8 = b'.';
    pub const CLIENT_HANDSHAKE: u8 = b'V';
}

pub mod server {
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const COMMAND_DATA_DESCRIPTION: u8 = b'T';
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const LOG_MESSAGE: u8 = b'L';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const RESTORE_READY: u8 = b'+';
}
